//! Shared data model for the cohort query engine: calendar dates, patient
//! records as they appear in input files, and the wire query verbs.

mod date;
mod query;
mod record;

pub use date::{Date, DateError, DateRange, NO_DATE};
pub use query::{Query, QueryError};
pub use record::{AgeBuckets, Event, Record, RecordError, RecordLine, AGE_LIMIT};
