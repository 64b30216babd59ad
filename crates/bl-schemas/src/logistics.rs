use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::PrincipalId;

/// A supplier's published logistics capabilities. One per supplier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogisticsProfile {
    pub supplier_id: PrincipalId,
    pub fleet_size: u32,
    pub coverage_areas: Vec<String>,
    pub transport_modes: Vec<String>,
    pub lead_time: Option<String>,
    pub contact_person: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Partial update; `None` keeps the stored value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileUpdate {
    pub fleet_size: Option<u32>,
    pub coverage_areas: Option<Vec<String>>,
    pub transport_modes: Option<Vec<String>>,
    pub lead_time: Option<String>,
    pub contact_person: Option<String>,
}

impl LogisticsProfile {
    pub fn empty(supplier_id: PrincipalId, now: DateTime<Utc>) -> Self {
        Self {
            supplier_id,
            fleet_size: 0,
            coverage_areas: Vec::new(),
            transport_modes: Vec::new(),
            lead_time: None,
            contact_person: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn merge(&mut self, update: ProfileUpdate, now: DateTime<Utc>) {
        if let Some(v) = update.fleet_size {
            self.fleet_size = v;
        }
        if let Some(v) = update.coverage_areas {
            self.coverage_areas = v;
        }
        if let Some(v) = update.transport_modes {
            self.transport_modes = v;
        }
        if update.lead_time.is_some() {
            self.lead_time = update.lead_time;
        }
        if update.contact_person.is_some() {
            self.contact_person = update.contact_person;
        }
        self.updated_at = now;
    }
}
