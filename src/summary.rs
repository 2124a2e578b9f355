use serde::Serialize;

use crate::spec::ClientResults;

/// Throughput of one iteration in kbit/s, if it took measurable time.
pub fn speed_kbps(r: &ClientResults) -> Option<f64> {
    (r.elapsed > 0.0).then(|| r.received as f64 * 8.0 / r.elapsed / 1000.0)
}

#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub server_fqdn: String,
    pub real_address: String,
    pub iterations: usize,
    pub median_speed_kbps: f64,
    pub mean_speed_kbps: f64,
    pub last_rate_kbps: i64,
}

impl Summary {
    pub fn from_results(server_fqdn: String, results: &[ClientResults]) -> Self {
        let mut speeds: Vec<f64> = results.iter().filter_map(speed_kbps).collect();
        speeds.sort_by(f64::total_cmp);

        let median_speed_kbps = match speeds.len() {
            0 => 0.0,
            n if n % 2 == 1 => speeds[n / 2],
            n => (speeds[n / 2 - 1] + speeds[n / 2]) / 2.0,
        };
        let mean_speed_kbps = if speeds.is_empty() {
            0.0
        } else {
            speeds.iter().sum::<f64>() / speeds.len() as f64
        };

        Summary {
            server_fqdn,
            real_address: results
                .first()
                .map(|r| r.real_address.clone())
                .unwrap_or_default(),
            iterations: results.len(),
            median_speed_kbps,
            mean_speed_kbps,
            last_rate_kbps: results.last().map(|r| r.rate).unwrap_or_default(),
        }
    }
}
