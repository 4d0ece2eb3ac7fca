pub mod log;
pub mod writer;

use crate::schema::conform_batch;
use crate::storage::TableLocation;
use crate::utils::arrow::total_rows;
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use common::{Error, Result};
use datafusion::datasource::TableProvider;
use datafusion::datasource::file_format::parquet::ParquetFormat;
use datafusion::datasource::listing::{
    ListingOptions, ListingTable, ListingTableConfig, ListingTableUrl,
};
use futures::TryStreamExt;
use log::{CommitEntry, CommitOperation, DataFile, LOG_DIR};
use object_store::path::Path;
use object_store::{ObjectMeta, PutMode, PutOptions, PutPayload};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Committed state of a table at one version.
#[derive(Debug, Clone)]
pub struct TableSnapshot {
    pub version: u64,
    pub schema: SchemaRef,
    pub files: Vec<DataFile>,
}

impl TableSnapshot {
    pub fn num_rows(&self) -> u64 {
        self.files.iter().map(|f| f.num_rows).sum()
    }
}

/// Append-only table of Parquet files tracked by a JSON commit log.
///
/// A data file becomes visible only once the commit entry that references it
/// is written, and commit entries are written with put-if-absent. Each
/// [`append`](Self::append) is therefore atomic: readers see all of its rows
/// or none.
#[derive(Debug, Clone)]
pub struct ParquetLogTable {
    location: TableLocation,
}

impl ParquetLogTable {
    pub fn new(location: TableLocation) -> Self {
        Self { location }
    }

    pub fn location(&self) -> &TableLocation {
        &self.location
    }

    pub fn uri(&self) -> &str {
        self.location.uri()
    }

    pub async fn exists(&self) -> Result<bool> {
        Ok(!self.list_log_entries().await?.is_empty())
    }

    /// Creates version 0: an empty table carrying `schema`.
    pub async fn create_empty(&self, schema: SchemaRef) -> Result<TableSnapshot> {
        if self.exists().await? {
            return Err(Error::TableExists(self.uri().to_string()));
        }

        let file = self.write_data_file(0, &schema, &[]).await?;
        let entry = CommitEntry::new(0, CommitOperation::Create, vec![file.clone()]);
        self.commit(&entry, Some(&file)).await?;

        debug!(table = self.uri(), fields = schema.fields().len(), "Created empty table");
        Ok(TableSnapshot {
            version: 0,
            schema,
            files: vec![file],
        })
    }

    /// Appends `batches` as one new version and returns that version.
    pub async fn append(&self, batches: &[RecordBatch]) -> Result<u64> {
        let snapshot = self.snapshot().await?;
        let version = snapshot.version + 1;

        let conformed = batches
            .iter()
            .filter(|batch| batch.num_rows() > 0)
            .map(|batch| conform_batch(batch, &snapshot.schema))
            .collect::<Result<Vec<_>>>()?;

        let files = if conformed.is_empty() {
            Vec::new()
        } else {
            vec![self.write_data_file(version, &snapshot.schema, &conformed).await?]
        };

        let entry = CommitEntry::new(version, CommitOperation::Append, files);
        self.commit(&entry, entry.files.first()).await?;

        debug!(
            table = self.uri(),
            version,
            rows = entry.num_rows(),
            "Committed append"
        );
        Ok(version)
    }

    pub async fn snapshot(&self) -> Result<TableSnapshot> {
        let entries = self.read_log().await?;

        let schema_file = entries
            .first()
            .filter(|entry| entry.operation == CommitOperation::Create)
            .and_then(|entry| entry.files.first())
            .ok_or_else(|| {
                Error::Storage(format!("Table {} has no CREATE entry at version 0", self.uri()))
            })?;
        let schema = writer::decode_schema(self.get_bytes(&schema_file.path).await?)?;

        let version = entries.last().map(|entry| entry.version).unwrap_or(0);
        let files = entries.into_iter().flat_map(|entry| entry.files).collect();

        Ok(TableSnapshot {
            version,
            schema,
            files,
        })
    }

    /// Reads every committed row, in commit order.
    pub async fn read_all(&self) -> Result<Vec<RecordBatch>> {
        let snapshot = self.snapshot().await?;
        let mut batches = Vec::new();

        for file in &snapshot.files {
            let (_, file_batches) = writer::decode_parquet(self.get_bytes(&file.path).await?)?;
            for batch in file_batches {
                batches.push(conform_batch(&batch, &snapshot.schema)?);
            }
        }

        Ok(batches)
    }

    /// Removes every object under the table root. Returns how many were
    /// deleted; a missing table deletes nothing.
    pub async fn delete(&self) -> Result<usize> {
        let store = self.location.store();
        let objects: Vec<ObjectMeta> = store
            .list(Some(self.location.root()))
            .try_collect()
            .await?;

        for object in &objects {
            store.delete(&object.location).await?;
        }

        debug!(table = self.uri(), removed = objects.len(), "Deleted table objects");
        Ok(objects.len())
    }

    /// A DataFusion view over the files committed right now. Later appends
    /// are not visible through it.
    pub async fn listing_table(&self) -> Result<Arc<dyn TableProvider>> {
        let snapshot = self.snapshot().await?;

        let urls = snapshot
            .files
            .iter()
            .map(|file| {
                let path = self.location.join(&file.path);
                ListingTableUrl::parse(self.location.object_url(&path))
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let options = ListingOptions::new(Arc::new(ParquetFormat::default()))
            .with_file_extension(".parquet");
        let config = ListingTableConfig::new_with_multi_paths(urls)
            .with_listing_options(options)
            .with_schema(snapshot.schema);

        Ok(Arc::new(ListingTable::try_new(config)?))
    }

    async fn list_log_entries(&self) -> Result<Vec<(u64, Path)>> {
        let prefix = self.location.join(LOG_DIR);
        let objects: Vec<ObjectMeta> = self
            .location
            .store()
            .list(Some(&prefix))
            .try_collect()
            .await?;

        let mut entries: Vec<(u64, Path)> = objects
            .into_iter()
            .filter_map(|object| {
                let version = object.location.filename().and_then(log::parse_log_version)?;
                Some((version, object.location))
            })
            .collect();
        entries.sort_by_key(|(version, _)| *version);
        Ok(entries)
    }

    async fn read_log(&self) -> Result<Vec<CommitEntry>> {
        let listed = self.list_log_entries().await?;
        if listed.is_empty() {
            return Err(Error::TableNotFound(self.uri().to_string()));
        }

        let mut entries = Vec::with_capacity(listed.len());
        for (expected, (version, path)) in listed.into_iter().enumerate() {
            if version != expected as u64 {
                return Err(Error::Storage(format!(
                    "Table {} is missing commit version {}",
                    self.uri(),
                    expected
                )));
            }
            let data = self.location.store().get(&path).await?.bytes().await?;
            entries.push(serde_json::from_slice::<CommitEntry>(&data)?);
        }

        Ok(entries)
    }

    async fn write_data_file(
        &self,
        version: u64,
        schema: &SchemaRef,
        batches: &[RecordBatch],
    ) -> Result<DataFile> {
        let name = log::data_file_name(version, &Uuid::new_v4());
        let data = writer::encode_parquet(Arc::clone(schema), batches)?;
        let size_bytes = data.len() as u64;

        self.location
            .store()
            .put(&self.location.join(&name), PutPayload::from(data))
            .await?;

        Ok(DataFile {
            path: name,
            num_rows: total_rows(batches) as u64,
            size_bytes,
        })
    }

    /// Writes the commit entry; on failure removes the already written data
    /// file so nothing unreferenced is left behind.
    async fn commit(&self, entry: &CommitEntry, written: Option<&DataFile>) -> Result<()> {
        let payload = PutPayload::from(serde_json::to_vec_pretty(entry)?);
        let options = PutOptions {
            mode: PutMode::Create,
            ..Default::default()
        };

        let result = self
            .location
            .store()
            .put_opts(&self.location.join(&log::log_entry_path(entry.version)), payload, options)
            .await;

        let Err(err) = result else {
            return Ok(());
        };

        if let Some(file) = written {
            let path = self.location.join(&file.path);
            if let Err(cleanup) = self.location.store().delete(&path).await {
                warn!(path = %path, error = %cleanup, "Failed to remove uncommitted data file");
            }
        }

        match err {
            object_store::Error::AlreadyExists { .. } => Err(Error::Storage(format!(
                "Version {} of table {} was committed concurrently",
                entry.version,
                self.uri()
            ))),
            other => Err(other.into()),
        }
    }

    async fn get_bytes(&self, relative: &str) -> Result<bytes::Bytes> {
        let path = self.location.join(relative);
        Ok(self.location.store().get(&path).await?.bytes().await?)
    }
}
