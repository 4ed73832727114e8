//! Process configuration.
//!
//! Settings come from a `key=value` configuration file and command-line
//! flags, flags winning. Keys the engine does not recognize stay available
//! through [`Config::param`]; the engine ignores them otherwise.

use std::collections::HashMap;
use std::io::BufRead;

use lockstep_communication::worker_info::WorkerInfo;

/// Startup configuration of one process.
#[derive(Clone, Debug)]
pub struct Config {
    master_host: Option<String>,
    master_port: u16,
    comm_port: u16,
    hostname: String,
    machines: Vec<String>,
    workers_per_process: usize,
    serve: bool,
    params: HashMap<String, String>,
}

impl Config {
    /// A single-process configuration with `workers` threads, no master,
    /// and no networking. Used by tests and local runs.
    pub fn local(workers: usize) -> Config {
        Config {
            master_host: None,
            master_port: 0,
            comm_port: 0,
            hostname: "localhost".to_owned(),
            machines: vec!["localhost".to_owned()],
            workers_per_process: workers,
            serve: false,
            params: HashMap::new(),
        }
    }

    /// Parses command-line arguments (without the program name).
    pub fn from_args<I: Iterator<Item = String>>(args: I) -> Result<Config, String> {
        let mut opts = getopts::Options::new();
        opts.optopt("c", "conf", "configuration file of key=value lines", "FILE");
        opts.optopt("", "master_host", "hostname of the master", "HOST");
        opts.optopt("", "master_port", "control-plane port of the master", "PORT");
        opts.optopt("", "comm_port", "data-plane port of every process", "PORT");
        opts.optopt("", "hostname", "this process's identity in the machine list", "NAME");
        opts.optopt("w", "workers", "worker threads per process", "NUM");
        opts.optopt("h", "hostfile", "text file whose lines are machine names", "FILE");
        opts.optmulti("p", "param", "free-form parameter", "KEY=VALUE");
        opts.optflag("", "serve", "keep the master alive after the job finishes");

        let matches = opts.parse(args).map_err(|e| e.to_string())?;
        let mut config = Config::local(1);

        if let Some(path) = matches.opt_str("conf") {
            let file = std::fs::File::open(&path).map_err(|e| format!("conf {}: {}", path, e))?;
            for line in std::io::BufReader::new(file).lines() {
                let line = line.map_err(|e| e.to_string())?;
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                let (key, value) = line
                    .split_once('=')
                    .ok_or_else(|| format!("conf {}: malformed line {:?}", path, line))?;
                config.set_key(key.trim(), value.trim())?;
            }
        }

        for (flag, key) in [
            ("master_host", "master_host"),
            ("master_port", "master_port"),
            ("comm_port", "comm_port"),
            ("hostname", "hostname"),
            ("workers", "workers_per_process"),
        ] {
            if let Some(value) = matches.opt_str(flag) {
                config.set_key(key, &value)?;
            }
        }
        if let Some(path) = matches.opt_str("hostfile") {
            let file = std::fs::File::open(&path).map_err(|e| format!("hostfile {}: {}", path, e))?;
            config.machines = std::io::BufReader::new(file)
                .lines()
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| e.to_string())?
                .into_iter()
                .map(|line| line.trim().to_owned())
                .filter(|line| !line.is_empty())
                .collect();
        }
        for param in matches.opt_strs("param") {
            let (key, value) = param
                .split_once('=')
                .ok_or_else(|| format!("param: malformed {:?}", param))?;
            config.params.insert(key.to_owned(), value.to_owned());
        }
        if matches.opt_present("serve") {
            config.serve = true;
        }

        if config.workers_per_process == 0 {
            return Err("workers_per_process must be at least 1".to_owned());
        }
        Ok(config)
    }

    fn set_key(&mut self, key: &str, value: &str) -> Result<(), String> {
        match key {
            "master_host" => self.master_host = Some(value.to_owned()),
            "master_port" => {
                self.master_port = value.parse().map_err(|_| format!("bad master_port {:?}", value))?
            }
            "comm_port" => {
                self.comm_port = value.parse().map_err(|_| format!("bad comm_port {:?}", value))?
            }
            "hostname" => self.hostname = value.to_owned(),
            "workers_per_process" => {
                self.workers_per_process =
                    value.parse().map_err(|_| format!("bad worker count {:?}", value))?
            }
            "machines" => {
                self.machines = value.split(',').map(|m| m.trim().to_owned()).collect()
            }
            "serve" => self.serve = value == "1" || value == "true",
            other => {
                self.params.insert(other.to_owned(), value.to_owned());
            }
        }
        Ok(())
    }

    /// The master's hostname, when a master is configured.
    pub fn master_host(&self) -> Option<&str> {
        self.master_host.as_deref()
    }

    /// Control-plane port of the master.
    pub fn master_port(&self) -> u16 {
        self.master_port
    }

    /// Data-plane port every process listens on.
    pub fn comm_port(&self) -> u16 {
        self.comm_port
    }

    /// This process's identity in the machine list.
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// All machine names, in process-id order.
    pub fn machines(&self) -> &[String] {
        &self.machines
    }

    /// Worker threads per process.
    pub fn workers_per_process(&self) -> usize {
        self.workers_per_process
    }

    /// Whether the master stays alive after the job finishes.
    pub fn serve(&self) -> bool {
        self.serve
    }

    /// A free-form parameter, if present.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Id of this process: its position in the machine list.
    pub fn process_id(&self) -> Result<usize, String> {
        self.machines
            .iter()
            .position(|m| m == &self.hostname)
            .ok_or_else(|| format!("hostname {:?} is not in the machine list", self.hostname))
    }

    /// Builds the cluster directory implied by this configuration.
    pub fn worker_info(&self) -> Result<WorkerInfo, String> {
        let mut info = WorkerInfo::new();
        for (pid, machine) in self.machines.iter().enumerate() {
            info.add_process(pid, machine);
            for local in 0..self.workers_per_process {
                info.add_worker(pid, pid * self.workers_per_process + local, local);
            }
        }
        info.set_process_id(self.process_id()?);
        Ok(info)
    }

    /// Data-plane address of a process.
    pub fn comm_addr_of(&self, process_id: usize) -> String {
        format!("{}:{}", self.machines[process_id], self.comm_port)
    }
}
