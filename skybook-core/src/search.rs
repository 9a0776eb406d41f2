use serde::{Deserialize, Serialize};
use crate::flight::Flight;
use crate::{CoreError, CoreResult};

pub const DEFAULT_PAGE_SIZE: u32 = 10;
pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FlightSearchRequest {
    pub origin: Option<String>,
    pub destination: Option<String>,
    pub date: Option<chrono::NaiveDate>, // Matches departures within this UTC day
    pub limit: Option<u32>,
    pub page: Option<u32>,
}

/// Validated search input handed to the repository.
#[derive(Debug, Clone, PartialEq)]
pub struct FlightSearchCriteria {
    pub origin: Option<String>,
    pub destination: Option<String>,
    pub date: Option<chrono::NaiveDate>,
    pub limit: u32,
    pub page: u32,
}

impl FlightSearchCriteria {
    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.limit)
    }
}

impl TryFrom<FlightSearchRequest> for FlightSearchCriteria {
    type Error = CoreError;

    fn try_from(req: FlightSearchRequest) -> CoreResult<Self> {
        let limit = req.limit.unwrap_or(DEFAULT_PAGE_SIZE);
        if limit == 0 || limit > MAX_PAGE_SIZE {
            return Err(CoreError::ValidationError(format!("limit must be between 1 and {}", MAX_PAGE_SIZE)));
        }

        let page = req.page.unwrap_or(1);
        if page == 0 {
            return Err(CoreError::ValidationError("page must be at least 1".to_string()));
        }

        let non_blank = |s: Option<String>| s.map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        Ok(Self {
            origin: non_blank(req.origin),
            destination: non_blank(req.destination),
            date: req.date,
            limit,
            page,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct FlightPage {
    pub flights: Vec<Flight>,
    pub total: i64,
    pub page: u32,
    pub limit: u32,
    pub total_pages: i64,
}

impl FlightPage {
    pub fn new(flights: Vec<Flight>, total: i64, criteria: &FlightSearchCriteria) -> Self {
        let limit = i64::from(criteria.limit);
        Self {
            flights,
            total,
            page: criteria.page,
            limit: criteria.limit,
            total_pages: (total + limit - 1) / limit,
        }
    }
}
