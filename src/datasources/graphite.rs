use chrono::{TimeZone, Utc};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::{Datasource, DatasourceConfig, DatasourceError, Point, SampleQuery, Series};

/// Graphite render API client.
pub struct GraphiteDatasource {
    client: Client,
    render_url: String,
}

#[derive(Debug, Deserialize)]
struct RenderSeries {
    datapoints: Vec<(Option<f64>, i64)>,
}

impl GraphiteDatasource {
    pub fn from_config(config: &DatasourceConfig) -> Result<Self, DatasourceError> {
        let url = config.url.as_deref().ok_or(DatasourceError::MissingUrl)?;
        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| DatasourceError::InvalidHeader(name.clone()))?;
            let value = HeaderValue::from_str(value)
                .map_err(|_| DatasourceError::InvalidHeader(name.to_string()))?;
            headers.insert(name, value);
        }
        let client = Client::builder()
            .timeout(config.timeout())
            .default_headers(headers)
            .build()?;
        Ok(Self {
            client,
            render_url: format!("{}/render", url.trim_end_matches('/')),
        })
    }
}

/// Render target for a tag query, e.g.
/// `sumSeries(seriesByTag('app=shop','role=web'))|summarize('1h','sum')`.
pub fn render_target(query: &SampleQuery) -> String {
    let tag_query = query
        .tags
        .iter()
        .map(|(k, v)| format!("'{}={}'", k, v))
        .collect::<Vec<_>>()
        .join(",");
    let mut target = format!("seriesByTag({})", tag_query);
    if query.function == "sum" {
        target = format!("sumSeries({})", target);
    }
    if let Some(interval) = &query.interval {
        target = format!("{}|summarize('{}','{}')", target, interval, query.function);
    }
    target
}

#[async_trait::async_trait]
impl Datasource for GraphiteDatasource {
    async fn query(&self, query: &SampleQuery) -> Result<Series, DatasourceError> {
        let target = render_target(query);
        debug!(%target, url = %self.render_url, "querying graphite");
        let response = self
            .client
            .get(&self.render_url)
            .query(&[
                ("target", target.as_str()),
                ("from", query.start.as_str()),
                ("until", query.end.as_str()),
                ("format", "json"),
            ])
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DatasourceError::Status {
                status: status.as_u16(),
                url: self.render_url.clone(),
            });
        }
        let body = response.text().await?;
        let rendered: Vec<RenderSeries> =
            serde_json::from_str(&body).map_err(|e| DatasourceError::Decode(e.to_string()))?;
        let Some(first) = rendered.into_iter().next() else {
            return Ok(Series::default());
        };
        let points = first
            .datapoints
            .into_iter()
            .map(|(value, ts)| {
                let timestamp = Utc
                    .timestamp_opt(ts, 0)
                    .single()
                    .ok_or_else(|| DatasourceError::Decode(format!("timestamp out of range: {}", ts)))?;
                Ok(Point { timestamp, value })
            })
            .collect::<Result<Vec<_>, DatasourceError>>()?;
        debug!(points = points.len(), "graphite query complete");
        Ok(Series { points })
    }
}
