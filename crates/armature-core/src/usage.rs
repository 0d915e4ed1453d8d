use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Per-thread CPU times inside a [`UsageStat`] sample.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CpuTimesStat {
    pub user: f64,
    pub system: f64,
    pub idle: f64,
    pub nice: f64,
    pub iowait: f64,
    pub irq: f64,
    pub softirq: f64,
    pub steal: f64,
    pub guest: f64,
    pub guest_nice: f64,
}

/// A resource limit inside a [`UsageStat`] sample.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RlimitStat {
    pub resource: String,
    pub name: String,
    pub soft: u64,
    pub hard: u64,
    pub used: u64,
}

/// An open connection inside a [`UsageStat`] sample.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionStat {
    pub fd: u32,
    pub family: u32,
    #[serde(rename = "type")]
    pub kind: u32,
    pub laddr_ip: String,
    pub laddr_port: u32,
    pub raddr_ip: String,
    pub raddr_port: u32,
    pub status: String,
    pub pid: i32,
}

/// One process usage sample, mirrored to the debugger as `usage:stats`.
///
/// The framework does not collect these itself; an opaque provider hook in
/// the configuration produces them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageStat {
    pub pid: i32,
    pub name: String,
    #[serde(default)]
    pub status: Vec<String>,
    pub cmdline: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub exe: String,
    pub cwd: String,
    pub create_time: i64,
    pub username: String,
    #[serde(default)]
    pub uids: Vec<i32>,
    #[serde(default)]
    pub gids: Vec<i32>,
    #[serde(default)]
    pub groups: Vec<i32>,
    pub cpu_percent: f64,
    pub memory_percent: f32,
    pub memory_rss: u64,
    pub memory_vms: u64,
    pub io_read_bytes: u64,
    pub io_write_bytes: u64,
    pub num_fds: i32,
    pub num_threads: i32,
    pub thread_count: i32,
    #[serde(default)]
    pub threads: BTreeMap<i32, CpuTimesStat>,
    pub num_ctx_switches_voluntary: i64,
    pub num_ctx_switches_involuntary: i64,
    pub open_files_count: i32,
    #[serde(default)]
    pub open_files: Vec<String>,
    pub nice: i32,
    pub terminal: String,
    pub ppid: i32,
    pub parent_pid: i32,
    #[serde(default)]
    pub rlimit: Vec<RlimitStat>,
    #[serde(default)]
    pub connections: Vec<ConnectionStat>,
    pub system_cpu_cores: i64,
    pub max_memory_total: u64,
    pub max_io_read_bytes: u64,
    pub max_io_write_bytes: u64,
    pub max_num_fds: i32,
    pub max_num_threads: i32,
}
