//! Panel data: many series co-indexed by timestamp
//!
//! A panel is keyed by (timestamp, series identifier). Panels read
//! independently from the TSDB are reconciled purely on that key: the
//! forecast components are outer-joined into tuples, and the realtime panel
//! is inner-joined against those tuples to select the points to score.

mod arrow;
mod forecast;
mod frame;
mod join;

pub use forecast::{ForecastComponent, ForecastFrame, ForecastPoint, ForecastTuple};
pub use frame::{Observation, PanelBuilder, PanelFrame, PanelKey};
pub use join::{inner_join, MatchedRow};
