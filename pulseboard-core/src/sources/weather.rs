//! wttr.in weather adapter

use super::{SourceAdapter, SourceError};
use crate::circuit::CircuitBreaker;
use crate::config::WeatherConfig;
use crate::types::{SourceData, SourceName, WeatherReport};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct Forecast {
    #[serde(default)]
    current_condition: Vec<CurrentCondition>,
}

#[derive(Debug, Deserialize)]
struct CurrentCondition {
    #[serde(rename = "temp_C")]
    temp_c: Option<String>,
    #[serde(rename = "weatherDesc", default)]
    weather_desc: Vec<Description>,
    humidity: Option<String>,
    #[serde(rename = "windspeedKmph")]
    wind_kph: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Description {
    value: String,
}

pub struct WeatherAdapter {
    config: WeatherConfig,
    client: reqwest::Client,
    circuit: Option<Arc<CircuitBreaker>>,
}

impl WeatherAdapter {
    pub fn new(
        config: WeatherConfig,
        client: reqwest::Client,
        circuit: Option<Arc<CircuitBreaker>>,
    ) -> Self {
        Self {
            config,
            client,
            circuit,
        }
    }
}

#[async_trait]
impl SourceAdapter for WeatherAdapter {
    fn source(&self) -> SourceName {
        SourceName::Weather
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeout_secs)
    }

    fn is_configured(&self) -> bool {
        self.config.enabled && !self.config.location.is_empty()
    }

    fn circuit(&self) -> Option<&CircuitBreaker> {
        self.circuit.as_deref()
    }

    async fn fetch(&self) -> Result<SourceData, SourceError> {
        let url = format!(
            "{}/{}?format=j1",
            self.config.base_url.trim_end_matches('/'),
            urlencoding::encode(&self.config.location)
        );
        let response = self
            .client
            .get(&url)
            .timeout(self.timeout())
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SourceError::from_response(response).await);
        }

        let forecast: Forecast = response.json().await?;
        Ok(SourceData::Weather(into_report(
            &self.config.location,
            forecast,
        )))
    }
}

fn into_report(location: &str, forecast: Forecast) -> WeatherReport {
    let current = forecast.current_condition.into_iter().next();
    match current {
        Some(c) => WeatherReport {
            location: location.to_string(),
            temp_c: c.temp_c,
            condition: c.weather_desc.into_iter().next().map(|d| d.value),
            humidity: c.humidity,
            wind_kph: c.wind_kph,
        },
        None => WeatherReport {
            location: location.to_string(),
            temp_c: None,
            condition: None,
            humidity: None,
            wind_kph: None,
        },
    }
}
