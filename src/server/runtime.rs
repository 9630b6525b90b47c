/// Container-aware worker-thread sizing for the tokio runtime.
///
/// Detection order: `REPROXY_CPU_LIMIT` env override (supports "4" and
/// "4000m"), cgroup v2 `cpu.max`, cgroup v1 quota/period, then host
/// parallelism. Tokio's default is the host CPU count, which
/// over-provisions threads inside CPU-limited containers.
pub fn worker_thread_count() -> usize {
    if let Ok(value) = std::env::var("REPROXY_CPU_LIMIT") {
        if let Some(cores) = parse_cpu_value(&value) {
            return cores.max(1);
        }
    }

    if let Ok(content) = std::fs::read_to_string("/sys/fs/cgroup/cpu.max") {
        if let Some(cores) = parse_cgroup_v2_cpu(&content) {
            return cores.max(1);
        }
    }

    if let (Ok(quota), Ok(period)) = (
        std::fs::read_to_string("/sys/fs/cgroup/cpu/cpu.cfs_quota_us"),
        std::fs::read_to_string("/sys/fs/cgroup/cpu/cpu.cfs_period_us"),
    ) {
        if let Some(cores) = quota_cores(quota.trim().parse().ok(), period.trim().parse().ok()) {
            return cores.max(1);
        }
    }

    std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(1)
}

/// "4" (cores) or "4000m" (millicores).
fn parse_cpu_value(value: &str) -> Option<usize> {
    let value = value.trim();
    match value.strip_suffix('m') {
        Some(millicores) => millicores.parse::<usize>().ok().map(|m| m / 1000),
        None => value.parse::<usize>().ok(),
    }
}

/// cgroup v2 `cpu.max` is "quota period" or "max period" (unlimited).
fn parse_cgroup_v2_cpu(content: &str) -> Option<usize> {
    let mut parts = content.split_whitespace();
    let quota = parts.next()?;
    let period = parts.next()?;
    if quota == "max" {
        return None;
    }
    quota_cores(quota.parse().ok(), period.parse().ok())
}

fn quota_cores(quota: Option<i64>, period: Option<i64>) -> Option<usize> {
    match (quota?, period?) {
        (quota, period) if quota > 0 && period > 0 => Some((quota / period) as usize),
        _ => None,
    }
}
