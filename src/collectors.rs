//! Collector snapshots attached to an `update` message when the cadence
//! controller decides this cycle is a "collector" cycle. WAP and interface
//! collection aren't implemented by this agent; they report an empty array
//! so the wire shape stays stable for a listener that expects the key to
//! always be present and iterable.

use serde_json::{json, Value};
use sysinfo::System;

/// Minimal system snapshot: load, memory and uptime. This is the one
/// collector with real behavior, grounded in the corpus's own pattern of a
/// throwaway `System::new()` + targeted `refresh_*()` calls per snapshot
/// rather than a long-lived refreshed handle.
pub fn collect_system() -> Value {
    let mut sys = System::new();
    sys.refresh_memory();
    sys.refresh_cpu_usage();

    let load = System::load_average();

    json!({
        "uptimeSec": System::uptime(),
        "loadAvg1": load.one,
        "loadAvg5": load.five,
        "loadAvg15": load.fifteen,
        "memTotalKb": sys.total_memory(),
        "memUsedKb": sys.used_memory(),
        "cpuUsagePct": cpu_usage_pct(&sys),
    })
}

fn cpu_usage_pct(sys: &System) -> f32 {
    let cpus = sys.cpus();
    if cpus.is_empty() {
        return 0.0;
    }
    cpus.iter().map(|c| c.cpu_usage()).sum::<f32>() / cpus.len() as f32
}

/// Wireless access-point collector. Reading the driver-specific survey data
/// isn't implemented here; an empty array keeps the field the type the
/// listener expects (a list of AP entries) so a future revision can fill it
/// in without changing the wire contract.
pub fn collect_wap() -> Value {
    json!([])
}

/// Interface statistics collector, likewise unimplemented and likewise an
/// array of per-interface entries.
pub fn collect_interface() -> Value {
    json!([])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_snapshot_has_expected_keys() {
        let snap = collect_system();
        assert!(snap.get("uptimeSec").is_some());
        assert!(snap.get("memTotalKb").is_some());
        assert!(snap.get("cpuUsagePct").is_some());
    }

    #[test]
    fn wap_and_interface_snapshots_are_empty_arrays() {
        assert_eq!(collect_wap(), json!([]));
        assert_eq!(collect_interface(), json!([]));
    }
}
