use core::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::Date;
use uuid::Uuid;

use crate::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
}

impl Gender {
    pub fn as_str(self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
        }
    }
}

impl FromStr for Gender {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "male" => Ok(Gender::Male),
            "female" => Ok(Gender::Female),
            _ => Err(StoreError::invalid("gender", "unknown gender value")),
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Employment record attached one-to-one to a directory user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmployeeProfile {
    pub user_id: Uuid,
    pub national_id: Option<String>,
    pub gender: Option<Gender>,
    pub insurance_number: Option<String>,
    pub employment_status: Option<String>,
    pub contract_months: u32,
    pub contract_start_date: Option<Date>,
}

impl EmployeeProfile {
    pub fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            national_id: None,
            gender: None,
            insurance_number: None,
            employment_status: None,
            contract_months: 0,
            contract_start_date: None,
        }
    }
}
