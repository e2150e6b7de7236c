//! Testing utilities: a mock converter and a disposable host platform.
//!
//! # Example
//!
//! ```rust,ignore
//! use transcoder_core::testing::fixtures::{video_markup, TestHarness};
//!
//! let dir = tempfile::TempDir::new()?;
//! let harness = TestHarness::new(dir.path());
//! let file = harness.add_file("talk.webm", "video/webm", b"webm bytes");
//! let page = harness.add_page(7, &video_markup("talk.webm"));
//!
//! let outcome = Worker::new(harness.services.clone()).process_next().await?;
//! ```

mod mock_converter;

pub use mock_converter::{MockConverter, RecordedConversion};

/// Test fixtures and helper functions.
pub mod fixtures {
    use std::path::{Path, PathBuf};
    use std::sync::Arc;

    use chrono::{DateTime, Utc};
    use rusqlite::{params, Connection};

    use super::MockConverter;
    use crate::config::{
        Config, ContentArea, DatabaseConfig, DiscoveryConfig, EngineConfig, HostConfig,
        ReconciliationConfig, RewriterConfig, WorkerConfig,
    };
    use crate::content::{hex_digest, ContentStore, NewFile, SqliteContentStore, StoredFile};
    use crate::document::SqliteDocumentStore;
    use crate::jobs::Services;
    use crate::rewriter::HtmlMarkup;
    use crate::task::SqliteTaskStore;

    /// Context every fixture file lives in.
    pub const CONTEXT_ID: i64 = 10;

    /// The `page` table's content column, scoped by course.
    pub fn page_area() -> ContentArea {
        ContentArea::new("mod_page", "content", "page", "content")
            .with_scope_column("course")
            .with_url_template("/mod/page/view.php?id={id}")
    }

    /// Markup embedding `filename` in a video element.
    pub fn video_markup(filename: &str) -> String {
        format!(
            r#"<p>Lecture</p><video controls><source src="@@PLUGINFILE@@/{}" type="video/webm"></video>"#,
            filename
        )
    }

    /// Markup embedding `filename` in an audio element.
    pub fn audio_markup(filename: &str) -> String {
        format!(
            r#"<audio controls><source src="@@PLUGINFILE@@/{}" type="audio/ogg"></audio>"#,
            filename
        )
    }

    /// Configuration with every database and blob under `root`.
    pub fn test_config(root: &Path) -> Config {
        Config {
            database: DatabaseConfig {
                path: root.join("transcoder.db"),
            },
            host: HostConfig {
                database: root.join("host.db"),
                data_root: root.join("data"),
            },
            worker: WorkerConfig::default(),
            engine: EngineConfig::with_paths("ffmpeg".into(), "ffprobe".into()),
            discovery: DiscoveryConfig::default(),
            reconciliation: ReconciliationConfig::default(),
            rewriter: RewriterConfig::default(),
            content_areas: vec![page_area()],
        }
    }

    /// SQLite stores on disk plus a mock converter, wired into [`Services`].
    pub struct TestHarness {
        pub services: Services,
        pub tasks: Arc<SqliteTaskStore>,
        pub content: Arc<SqliteContentStore>,
        pub documents: Arc<SqliteDocumentStore>,
        pub converter: Arc<MockConverter>,
        host_db: PathBuf,
    }

    impl TestHarness {
        pub fn new(root: &Path) -> Self {
            Self::with_config(test_config(root))
        }

        pub fn with_config(config: Config) -> Self {
            let tasks = Arc::new(
                SqliteTaskStore::new(&config.database.path).expect("failed to open task store"),
            );
            let content = Arc::new(
                SqliteContentStore::new(&config.host.database, &config.host.data_root)
                    .expect("failed to open content store"),
            );
            let documents = Arc::new(
                SqliteDocumentStore::new(&config.host.database)
                    .expect("failed to open document store"),
            );
            documents
                .execute_batch(
                    "CREATE TABLE IF NOT EXISTS page (
                        id INTEGER PRIMARY KEY AUTOINCREMENT,
                        course INTEGER NOT NULL,
                        content TEXT
                    );",
                )
                .expect("failed to create page table");
            let converter = Arc::new(MockConverter::new());

            let host_db = config.host.database.clone();
            let services = Services {
                config: Arc::new(config),
                tasks: tasks.clone(),
                content: content.clone(),
                documents: documents.clone(),
                converter: converter.clone(),
                markup: Arc::new(HtmlMarkup::new()),
            };

            Self {
                services,
                tasks,
                content,
                documents,
                converter,
                host_db,
            }
        }

        /// Store a file with its blob, modified now.
        pub fn add_file(&self, filename: &str, mimetype: &str, bytes: &[u8]) -> StoredFile {
            self.add_file_at(filename, mimetype, bytes, Utc::now())
        }

        /// Store a file with its blob, modified at `at`.
        pub fn add_file_at(
            &self,
            filename: &str,
            mimetype: &str,
            bytes: &[u8],
            at: DateTime<Utc>,
        ) -> StoredFile {
            let content_hash = hex_digest(bytes);
            let blob = self.content.blob_path(&content_hash);
            if let Some(parent) = blob.parent() {
                std::fs::create_dir_all(parent).expect("failed to create blob directory");
            }
            std::fs::write(&blob, bytes).expect("failed to write blob");

            let file = NewFile {
                content_hash,
                context_id: CONTEXT_ID,
                component: "mod_page".to_string(),
                file_area: "content".to_string(),
                item_id: 0,
                file_path: "/".to_string(),
                filename: filename.to_string(),
                mimetype: Some(mimetype.to_string()),
                size: bytes.len() as u64,
            };
            self.content
                .insert_record(&file, at)
                .expect("failed to insert file record")
        }

        fn connection(&self) -> Connection {
            Connection::open(&self.host_db).expect("failed to open host database")
        }

        /// Insert a page row and return its id.
        pub fn add_page(&self, course: i64, content: &str) -> i64 {
            let conn = self.connection();
            conn.execute(
                "INSERT INTO page (course, content) VALUES (?, ?)",
                params![course, content],
            )
            .expect("failed to insert page");
            conn.last_insert_rowid()
        }

        pub fn page_content(&self, id: i64) -> String {
            self.connection()
                .query_row("SELECT content FROM page WHERE id = ?", params![id], |row| {
                    row.get(0)
                })
                .expect("failed to read page")
        }

        pub fn set_page_content(&self, id: i64, content: &str) {
            self.connection()
                .execute(
                    "UPDATE page SET content = ? WHERE id = ?",
                    params![content, id],
                )
                .expect("failed to update page");
        }
    }
}
