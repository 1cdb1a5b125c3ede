//! Service layer
//!
//! 接入、队列处理以及通知/导出等外部协作方，
//! HTTP 处理器与 CLI 共用这些实现。

pub mod extractor;
pub mod http;
pub mod ingestion;
pub mod notifier;
pub mod processor;
pub mod retention;
pub mod sheets;

pub use extractor::{ExtractedFields, RequestParams, extract_fields};
pub use ingestion::{InboundRequest, IngestError, IngestReceipt, IngestRejection, IngestionGate};
pub use notifier::{Notifier, NotifyOutcome, TelegramNotifier};
pub use processor::{BatchReport, EntryOutcome, ProcessorConfig, QueueProcessor};
pub use retention::QueueRetentionTask;
pub use sheets::{ExportOutcome, GoogleSheetsExporter, SheetExporter};
