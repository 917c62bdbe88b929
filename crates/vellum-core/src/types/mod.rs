pub mod event;
pub mod field;
pub mod record;
pub mod timestamp;

pub use event::{
    event_id, event_id_prefix, event_type_name, parse_event_id, Event, PropertyChange, SaveAction, TraceContext,
};
pub use field::{FieldCatalog, FieldInfo, FieldSpec, FieldTable};
pub use record::{from_document, to_document, wire, Record, RecordMeta, ID_SEPARATOR};
