//! Generic entity engine with its script and rights ports.

mod entity;
mod exchange;
mod scripts;

pub use entity::{
    parameter_bag, CallContext, EntityEngine, ImportSummary, SaveOutcome, ID_FIELD, ORIGINAL_PREFIX, USER_FIELD,
};
pub use exchange::{read_csv, read_json, read_rows, write_csv, write_json, CSV_MEDIA_TYPE, JSON_MEDIA_TYPE};
pub use scripts::{EntityScripts, NoScripts, PreResultRights, RightsEvaluator, RightsRequest, ScriptContext};
