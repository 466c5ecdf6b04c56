//! Read-only queries over the bucket store.

use crate::db::ShiftDatabase;
use crate::error::Result;
use crate::models::ShiftBucket;
use crate::resolver::ShiftResolver;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A bucket plus derived KPIs, as reported to dashboards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShiftSummary {
    /// Stored bucket
    #[serde(flatten)]
    pub bucket: ShiftBucket,

    /// Defects per produced unit (0 when nothing was produced)
    pub defect_rate: f64,
}

impl From<ShiftBucket> for ShiftSummary {
    fn from(bucket: ShiftBucket) -> Self {
        let defect_rate = bucket.defect_rate();
        Self {
            bucket,
            defect_rate,
        }
    }
}

/// Query interface for shift KPIs.
pub struct BucketQuery<'a> {
    db: &'a ShiftDatabase,
    resolver: ShiftResolver,
}

impl<'a> BucketQuery<'a> {
    /// Create a new query interface.
    pub fn new(db: &'a ShiftDatabase, resolver: ShiftResolver) -> Self {
        Self { db, resolver }
    }

    /// Buckets of one production date, ordered by line then shift.
    pub fn buckets_for_date(&self, date: NaiveDate) -> Result<Vec<ShiftBucket>> {
        self.db.buckets_for_date(date)
    }

    /// Summaries of one production date.
    pub fn summaries_for_date(&self, date: NaiveDate) -> Result<Vec<ShiftSummary>> {
        Ok(self
            .buckets_for_date(date)?
            .into_iter()
            .map(ShiftSummary::from)
            .collect())
    }

    /// Production date of the shift currently running in the plant.
    ///
    /// Between midnight and the start of the day shift this is yesterday.
    pub fn today_date(&self) -> NaiveDate {
        self.resolver.current_production_date()
    }

    /// Summaries of the current production date.
    pub fn today(&self) -> Result<Vec<ShiftSummary>> {
        self.summaries_for_date(self.today_date())
    }
}
