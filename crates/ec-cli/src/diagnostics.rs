//! Connection diagnostics for an EtherNet/IP controller.
//!
//! Probes the controller's well-known TCP ports and reports whether the
//! EtherNet/IP service is reachable. Never writes to the controller.

use serde::Serialize;
use std::fmt::Write as _;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};
use tracing::debug;

/// EtherNet/IP explicit messaging port.
pub const ETHERNET_IP_PORT: u16 = 44818;

/// Ports probed by default.
pub const PROBE_PORTS: [(u16, &str); 4] = [
    (ETHERNET_IP_PORT, "EtherNet/IP (TCP)"),
    (2222, "EtherNet/IP (implicit I/O)"),
    (80, "HTTP"),
    (502, "Modbus TCP"),
];

/// Overall result of a probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// EtherNet/IP port open.
    Healthy,
    /// Host answers, but not on the EtherNet/IP port.
    Degraded,
    /// No probed port answered.
    Unreachable,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Healthy => write!(f, "healthy"),
            Verdict::Degraded => write!(f, "degraded"),
            Verdict::Unreachable => write!(f, "unreachable"),
        }
    }
}

/// Result of probing one port.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortProbe {
    pub port: u16,
    pub service: String,
    pub open: bool,
    /// Connect error, if closed.
    pub error: Option<String>,
    /// Connect time, if open.
    pub latency_ms: Option<f64>,
}

/// Result of probing a controller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeReport {
    pub address: String,
    pub ports: Vec<PortProbe>,
    pub verdict: Verdict,
}

impl ProbeReport {
    /// Derive the verdict from the port results.
    fn judge(ports: &[PortProbe]) -> Verdict {
        if ports.iter().any(|p| p.open && p.port == ETHERNET_IP_PORT) {
            Verdict::Healthy
        } else if ports.iter().any(|p| p.open) {
            Verdict::Degraded
        } else {
            Verdict::Unreachable
        }
    }
}

fn probe_port(host: &str, port: u16, timeout: Duration) -> Result<Duration, String> {
    let addrs: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|e| format!("resolve failed: {e}"))?
        .collect();
    let mut last_error = String::from("no address");
    for addr in addrs {
        let start = Instant::now();
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(_) => return Ok(start.elapsed()),
            Err(e) => last_error = e.to_string(),
        }
    }
    Err(last_error)
}

/// Probe `ports` on `host`, each with its own connect timeout.
pub fn probe(host: &str, ports: &[(u16, &str)], timeout: Duration) -> ProbeReport {
    let ports: Vec<PortProbe> = ports
        .iter()
        .map(|&(port, service)| {
            let result = probe_port(host, port, timeout);
            debug!(host, port, open = result.is_ok(), "Port probed");
            match result {
                Ok(latency) => PortProbe {
                    port,
                    service: service.to_string(),
                    open: true,
                    error: None,
                    latency_ms: Some(latency.as_secs_f64() * 1000.0),
                },
                Err(error) => PortProbe {
                    port,
                    service: service.to_string(),
                    open: false,
                    error: Some(error),
                    latency_ms: None,
                },
            }
        })
        .collect();
    let verdict = ProbeReport::judge(&ports);
    ProbeReport {
        address: host.to_string(),
        ports,
        verdict,
    }
}

/// Human-readable report.
pub fn format_report(report: &ProbeReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Connection diagnostics for {}", report.address);
    for p in &report.ports {
        match (p.open, p.latency_ms, &p.error) {
            (true, Some(ms), _) => {
                let _ = writeln!(out, "  [open]   {:>5}  {}  ({ms:.1} ms)", p.port, p.service);
            }
            (_, _, Some(error)) => {
                let _ = writeln!(out, "  [closed] {:>5}  {}  ({error})", p.port, p.service);
            }
            _ => {
                let _ = writeln!(out, "  [closed] {:>5}  {}", p.port, p.service);
            }
        }
    }
    let _ = write!(out, "Verdict: {}", report.verdict);
    if report.verdict != Verdict::Healthy {
        let _ = write!(
            out,
            " - check the controller address, cabling and that EtherNet/IP is enabled"
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    fn closed_port() -> u16 {
        // Bind then drop to get a port nobody listens on.
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    #[test]
    fn test_open_and_closed_ports() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let open = listener.local_addr().unwrap().port();
        let closed = closed_port();

        let report = probe(
            "127.0.0.1",
            &[(open, "test"), (closed, "nothing")],
            Duration::from_millis(500),
        );
        assert!(report.ports[0].open);
        assert!(report.ports[0].latency_ms.is_some());
        assert!(!report.ports[1].open);
        assert!(report.ports[1].error.is_some());
        // Port 44818 was not among the probed ones.
        assert_eq!(report.verdict, Verdict::Degraded);
    }

    #[test]
    fn test_verdicts() {
        let port = |port, open| PortProbe {
            port,
            service: String::new(),
            open,
            error: None,
            latency_ms: None,
        };
        assert_eq!(
            ProbeReport::judge(&[port(ETHERNET_IP_PORT, true), port(80, false)]),
            Verdict::Healthy
        );
        assert_eq!(
            ProbeReport::judge(&[port(ETHERNET_IP_PORT, false), port(80, true)]),
            Verdict::Degraded
        );
        assert_eq!(ProbeReport::judge(&[port(80, false)]), Verdict::Unreachable);
        assert_eq!(ProbeReport::judge(&[]), Verdict::Unreachable);
    }

    #[test]
    fn test_format_report() {
        let report = ProbeReport {
            address: String::from("192.168.1.100"),
            ports: vec![
                PortProbe {
                    port: ETHERNET_IP_PORT,
                    service: String::from("EtherNet/IP (TCP)"),
                    open: true,
                    error: None,
                    latency_ms: Some(1.5),
                },
                PortProbe {
                    port: 502,
                    service: String::from("Modbus TCP"),
                    open: false,
                    error: Some(String::from("connection refused")),
                    latency_ms: None,
                },
            ],
            verdict: Verdict::Healthy,
        };
        let text = format_report(&report);
        assert!(text.starts_with("Connection diagnostics for 192.168.1.100"));
        assert!(text.contains("[open]   44818  EtherNet/IP (TCP)  (1.5 ms)"));
        assert!(text.contains("[closed]   502  Modbus TCP  (connection refused)"));
        assert!(text.ends_with("Verdict: healthy"));

        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"verdict\":\"healthy\""));
    }
}
