//! Entity names shared between the cache, the change feed, and UI callers.
//!
//! Cache keys and change events must agree on these strings for entity-wide
//! invalidation to match up.

pub const SENSOR_DATA: &str = "sensor_data";
pub const MAINTENANCE_RECORDS: &str = "maintenance_records";
pub const TASKS: &str = "tasks";
pub const PROFILES: &str = "profiles";
pub const PREDICTIONS: &str = "predictions";
