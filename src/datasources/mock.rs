use chrono::{Duration, Utc};

use super::{Datasource, DatasourceConfig, DatasourceError, Point, SampleQuery, Series};

/// Returns canned values one minute apart, starting now.
#[derive(Debug, Clone)]
pub struct MockDatasource {
    data: Vec<Option<f64>>,
}

impl MockDatasource {
    pub fn new(data: Vec<Option<f64>>) -> Self {
        Self { data }
    }

    pub fn from_config(config: &DatasourceConfig) -> Self {
        let data = config
            .data
            .clone()
            .unwrap_or_else(|| (0..168).map(|i| Some(f64::from(i))).collect());
        Self::new(data)
    }
}

#[async_trait::async_trait]
impl Datasource for MockDatasource {
    async fn query(&self, _query: &SampleQuery) -> Result<Series, DatasourceError> {
        let start = Utc::now();
        let points = self
            .data
            .iter()
            .enumerate()
            .map(|(i, value)| Point {
                timestamp: start + Duration::minutes(i as i64),
                value: *value,
            })
            .collect();
        Ok(Series { points })
    }
}
