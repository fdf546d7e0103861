// Copyright 2025 The Pigweed Authors
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not
// use this file except in compliance with the License. You may obtain a copy of
// the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS, WITHOUT
// WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied. See the
// License for the specific language governing permissions and limitations under
// the License.

use std::time::Duration;

use futures::io::{AsyncRead, AsyncWrite};
use tracing::{info, warn};

use crate::config::BenchmarkConfig;
use crate::error::{Error, Result};
use crate::session::Session;

/// Timing for one send/receive size combination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Measurement {
    pub send_size: usize,
    pub recv_size: usize,
    /// Completed round trips.
    pub samples: u32,
    /// Sum of the completed round trip times.
    pub total: Duration,
    /// Round trips that timed out. The first timeout abandons the rest of
    /// the combination, so this is at most one.
    pub timeouts: u32,
}

impl Measurement {
    fn new(send_size: usize, recv_size: usize) -> Self {
        Self {
            send_size,
            recv_size,
            samples: 0,
            total: Duration::ZERO,
            timeouts: 0,
        }
    }

    pub fn average(&self) -> Option<Duration> {
        (self.samples > 0).then(|| self.total / self.samples)
    }

    pub fn packets_per_second(&self) -> Option<f64> {
        let average = self.average()?.as_secs_f64();
        (average > 0.0).then(|| 1.0 / average)
    }
}

/// Runs `config.iterations` speed tests for every combination of send and
/// receive size.
///
/// A timeout abandons the current combination and moves on to the next.
/// Any other error ends the run.
pub async fn run<S>(session: &mut Session<S>, config: &BenchmarkConfig) -> Result<Vec<Measurement>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut measurements = Vec::with_capacity(config.send_sizes.len() * config.recv_sizes.len());
    for &send_size in &config.send_sizes {
        for &recv_size in &config.recv_sizes {
            let mut measurement = Measurement::new(send_size, recv_size);
            for _ in 0..config.iterations {
                match session.speed_test(send_size, recv_size).await {
                    Ok(latency) => {
                        measurement.samples += 1;
                        measurement.total += latency;
                    }
                    Err(Error::Timeout(timeout)) => {
                        warn!(
                            send_size,
                            recv_size,
                            ?timeout,
                            "speed test timed out, abandoning size combination"
                        );
                        measurement.timeouts += 1;
                        break;
                    }
                    Err(err) => return Err(err),
                }
            }
            info!(
                send_size,
                recv_size,
                samples = measurement.samples,
                average = ?measurement.average(),
                "measured"
            );
            measurements.push(measurement);
        }
    }
    Ok(measurements)
}

/// Formats a measurement as one line of the benchmark report.
pub fn format_measurement(measurement: &Measurement) -> String {
    match (measurement.average(), measurement.packets_per_second()) {
        (Some(average), Some(rate)) => format!(
            "send={:5}, recv={:5}: avg={:8} us ({:5.2} packets per second)",
            measurement.send_size,
            measurement.recv_size,
            average.as_micros(),
            rate
        ),
        _ => format!(
            "send={:5}, recv={:5}: no samples ({} timeouts)",
            measurement.send_size, measurement.recv_size, measurement.timeouts
        ),
    }
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;
    use tokio_util::compat::TokioAsyncReadCompatExt;

    use super::*;
    use crate::config::SessionConfig;
    use crate::stub;

    #[test]
    fn test_measurement_statistics() {
        let measurement = Measurement {
            send_size: 32,
            recv_size: 512,
            samples: 4,
            total: Duration::from_millis(2),
            timeouts: 0,
        };
        assert_eq!(measurement.average(), Some(Duration::from_micros(500)));
        let rate = measurement.packets_per_second().unwrap();
        assert!((rate - 2000.0).abs() < 1e-6);
        assert_eq!(
            format_measurement(&measurement),
            "send=   32, recv=  512: avg=     500 us (2000.00 packets per second)"
        );
    }

    #[test]
    fn test_measurement_without_samples() {
        let mut measurement = Measurement::new(0, 1024);
        measurement.timeouts = 1;
        assert_eq!(measurement.average(), None);
        assert_eq!(measurement.packets_per_second(), None);
        assert_eq!(
            format_measurement(&measurement),
            "send=    0, recv= 1024: no samples (1 timeouts)"
        );
    }

    #[tokio::test]
    async fn test_run_against_stub() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(stub::serve_listener(listener));

        let mut session = Session::connect(addr, &SessionConfig::default())
            .await
            .unwrap();
        session.negotiate_no_ack().await.unwrap();

        let config = BenchmarkConfig {
            send_sizes: vec![0, 32],
            recv_sizes: vec![0, 512, 1024],
            iterations: 5,
            negotiate_no_ack: true,
        };
        let measurements = run(&mut session, &config).await.unwrap();

        let combinations: Vec<_> = measurements
            .iter()
            .map(|m| (m.send_size, m.recv_size))
            .collect();
        assert_eq!(
            combinations,
            [(0, 0), (0, 512), (0, 1024), (32, 0), (32, 512), (32, 1024)]
        );
        for measurement in &measurements {
            assert_eq!(measurement.samples, 5);
            assert_eq!(measurement.timeouts, 0);
        }
    }

    #[tokio::test]
    async fn test_timeout_abandons_combination() {
        // A peer that accepts bytes but never answers.
        let (client, _server) = tokio::io::duplex(64 * 1024);
        let session_config = SessionConfig {
            read_timeout_ms: 20,
            ..SessionConfig::default()
        };
        let mut session = Session::new(client.compat(), &session_config);

        let config = BenchmarkConfig {
            send_sizes: vec![0],
            recv_sizes: vec![0, 32],
            iterations: 3,
            negotiate_no_ack: false,
        };
        let measurements = run(&mut session, &config).await.unwrap();
        assert_eq!(measurements.len(), 2);
        for measurement in &measurements {
            assert_eq!(measurement.samples, 0);
            assert_eq!(measurement.timeouts, 1);
        }
    }
}
