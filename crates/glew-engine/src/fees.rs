use crate::EngineError;
use glew_schema::{FeeEstimate, FeesSection};
use serde::Deserialize;
use std::io::Read;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FeeDto {
    fastest_fee: f64,
    half_hour_fee: f64,
    hour_fee: f64,
    #[serde(default)]
    minimum_fee: f64,
}

impl From<FeeDto> for FeeEstimate {
    /// `low` never drops below the relay minimum.
    fn from(dto: FeeDto) -> Self {
        FeeEstimate {
            low: dto.hour_fee.max(dto.minimum_fee),
            medium: dto.half_hour_fee,
            high: dto.fastest_fee,
        }
    }
}

/// Blocking client for a mempool-style recommended fees endpoint.
#[derive(Clone)]
pub struct HttpFeeProvider {
    url: String,
    retries: u32,
    retry_delay: Duration,
    agent: ureq::Agent,
}

impl HttpFeeProvider {
    pub fn new(config: &FeesSection) -> Self {
        Self {
            url: config.url.clone(),
            retries: config.retries,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            agent: ureq::Agent::new_with_defaults(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Fetch current fee rates, retrying up to `retries` extra times.
    pub fn fetch(&self) -> Result<FeeEstimate, EngineError> {
        let mut attempt = 0;
        loop {
            match self.fetch_once() {
                Ok(estimate) => return Ok(estimate),
                Err(e) if attempt < self.retries => {
                    attempt += 1;
                    warn!("fee download failed ({e}), retry {attempt}/{}", self.retries);
                    std::thread::sleep(self.retry_delay);
                }
                Err(e) => return Err(EngineError::FeeRateUnavailable(e)),
            }
        }
    }

    fn fetch_once(&self) -> Result<FeeEstimate, String> {
        debug!("GET {}", self.url);
        let resp = match self.agent.get(&self.url).call() {
            Ok(r) => r,
            Err(ureq::Error::StatusCode(code)) => {
                return Err(format!("HTTP {code} for {}", self.url));
            }
            Err(e) => return Err(e.to_string()),
        };

        let mut body = Vec::new();
        resp.into_body()
            .into_reader()
            .read_to_end(&mut body)
            .map_err(|e| e.to_string())?;
        let dto: FeeDto = serde_json::from_slice(&body).map_err(|e| e.to_string())?;
        Ok(dto.into())
    }
}

impl std::fmt::Debug for HttpFeeProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpFeeProvider")
            .field("url", &self.url)
            .field("retries", &self.retries)
            .field("retry_delay", &self.retry_delay)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tiny_http::{Header, Response, Server, StatusCode};

    const FEES_JSON: &str =
        r#"{"fastestFee":33.0,"halfHourFee":22.0,"hourFee":11.0,"economyFee":5.0,"minimumFee":1.0}"#;

    /// Serve `responses` in order, one per request, then stop.
    fn serve(responses: Vec<(u16, &'static str)>) -> (String, Arc<AtomicUsize>) {
        let server = Server::http("127.0.0.1:0").unwrap();
        let url = format!("http://{}/api/v1/fees/recommended", server.server_addr());
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        std::thread::spawn(move || {
            for (code, body) in responses {
                let Ok(req) = server.recv() else { break };
                h.fetch_add(1, Ordering::SeqCst);
                let header = Header::from_bytes("Content-Type", "application/json").unwrap();
                let _ = req.respond(
                    Response::from_string(body)
                        .with_header(header)
                        .with_status_code(StatusCode(code)),
                );
            }
        });
        (url, hits)
    }

    fn provider(url: String, retries: u32) -> HttpFeeProvider {
        HttpFeeProvider::new(&FeesSection {
            url,
            retries,
            retry_delay_ms: 1,
        })
    }

    #[test]
    fn maps_mempool_fields_to_estimate() {
        let (url, _) = serve(vec![(200, FEES_JSON)]);
        let estimate = provider(url, 0).fetch().unwrap();
        assert_eq!(
            estimate,
            FeeEstimate {
                low: 11.0,
                medium: 22.0,
                high: 33.0
            }
        );
    }

    #[test]
    fn low_estimate_is_floored_at_minimum_fee() {
        let (url, _) = serve(vec![(
            200,
            r#"{"fastestFee":3.0,"halfHourFee":2.0,"hourFee":1.0,"minimumFee":1.5}"#,
        )]);
        let estimate = provider(url, 0).fetch().unwrap();
        assert!((estimate.low - 1.5).abs() < f64::EPSILON);
        assert!((estimate.medium - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn missing_minimum_fee_leaves_low_unchanged() {
        let (url, _) = serve(vec![(
            200,
            r#"{"fastestFee":3.0,"halfHourFee":2.0,"hourFee":1.0}"#,
        )]);
        let estimate = provider(url, 0).fetch().unwrap();
        assert!((estimate.low - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn retries_until_success() {
        let (url, hits) = serve(vec![(500, "oops"), (200, "not json"), (200, FEES_JSON)]);
        let estimate = provider(url, 3).fetch().unwrap();
        assert!((estimate.high - 33.0).abs() < f64::EPSILON);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn exhausted_retries_report_fee_rate_unavailable() {
        let (url, hits) = serve(vec![(503, "busy"), (503, "busy")]);
        let err = provider(url, 1).fetch().unwrap_err();
        assert!(matches!(err, EngineError::FeeRateUnavailable(_)));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }
}
