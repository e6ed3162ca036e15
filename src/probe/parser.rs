//! Parser for `traceroute` text output.

use std::net::Ipv4Addr;
use std::sync::OnceLock;

use regex::Regex;

use crate::db::{Hop, Measurement};

/// Parse traceroute output into a [`Measurement`].
///
/// Only lines shaped like `<hop> ... (<ipv4>) <latency> ms` count; anything
/// in between the hop number and the parenthesized address is ignored, so
/// hostnames and extra columns are fine. Timeout rows (`* * *`), headers
/// and hops whose address or latency does not parse are skipped silently.
pub fn parse_traceroute(output: &str, slow_threshold: f64) -> Measurement {
    static HOP_RE: OnceLock<Regex> = OnceLock::new();
    let re = HOP_RE.get_or_init(|| {
        Regex::new(r"^\s*(?P<hop>\d+)\s+.*?\((?P<ip>[\d.]+)\)\s+(?P<latency>[\d.]+)\s*ms").unwrap()
    });

    let mut measurement = Measurement::default();
    let mut fastest = f64::INFINITY;

    for line in output.lines() {
        let caps = match re.captures(line) {
            Some(c) => c,
            None => continue,
        };

        let hop = match caps["hop"].parse::<u32>() {
            Ok(n) => n,
            Err(_) => continue,
        };
        if caps["ip"].parse::<Ipv4Addr>().is_err() {
            continue;
        }
        let latency = match caps["latency"].parse::<f64>() {
            Ok(ms) if ms.is_finite() => ms,
            _ => continue,
        };

        let is_slow = latency > slow_threshold;
        if is_slow {
            measurement.slow_hops_count += 1;
        }
        fastest = fastest.min(latency);
        measurement.slowest_hop = measurement.slowest_hop.max(latency);
        measurement.detailed_hops.push(Hop {
            hop,
            ip: caps["ip"].to_string(),
            latency,
            is_slow,
        });
    }

    measurement.total_hops = measurement.detailed_hops.len() as u32;
    measurement.fastest_hop = if fastest.is_finite() { fastest } else { 0.0 };
    measurement
}
