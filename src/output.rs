//! Report emitters (JSON document, NDJSON stream, human summary)

pub mod human;
pub mod json;
pub mod ndjson;

pub use human::HumanFormatter;
pub use json::{JsonReport, emit_json, write_json_report};
pub use ndjson::{NdjsonWriter, ReportRecord, emit_ndjson, parse_ndjson};
