//! The static directory of processes and worker threads.

/// Cluster topology, populated once at startup and immutable afterwards.
///
/// Maps between process ids, global worker thread ids, and per-process local
/// worker ids, and records each process's hostname. Global worker ids must be
/// unique; registering the same global id twice is a configuration error and
/// panics.
#[derive(Clone, Debug, Default)]
pub struct WorkerInfo {
    process_id: usize,
    global_to_process: Vec<Option<usize>>,
    local_to_global: Vec<Vec<usize>>,
    hosts: Vec<String>,
}

impl WorkerInfo {
    /// Creates an empty directory.
    pub fn new() -> Self {
        WorkerInfo::default()
    }

    /// Sets the id of the calling process.
    pub fn set_process_id(&mut self, process_id: usize) {
        self.process_id = process_id;
    }

    /// Registers a worker thread under its process, global, and local ids.
    pub fn add_worker(&mut self, process_id: usize, global_tid: usize, local_tid: usize) {
        if self.global_to_process.len() <= global_tid {
            self.global_to_process.resize(global_tid + 1, None);
        }
        assert!(
            self.global_to_process[global_tid].is_none(),
            "WorkerInfo::add_worker: duplicate global worker id {}",
            global_tid
        );
        self.global_to_process[global_tid] = Some(process_id);

        if self.local_to_global.len() <= process_id {
            self.local_to_global.resize(process_id + 1, Vec::new());
        }
        let locals = &mut self.local_to_global[process_id];
        assert_eq!(
            locals.len(),
            local_tid,
            "WorkerInfo::add_worker: local ids of process {} must be added in order",
            process_id
        );
        locals.push(global_tid);
    }

    /// Records a process's hostname.
    pub fn add_process(&mut self, process_id: usize, hostname: &str) {
        if self.hosts.len() <= process_id {
            self.hosts.resize(process_id + 1, String::new());
        }
        self.hosts[process_id] = hostname.to_owned();
    }

    /// Id of the calling process.
    pub fn process_id(&self) -> usize {
        self.process_id
    }

    /// Total number of processes.
    pub fn num_processes(&self) -> usize {
        self.local_to_global.len()
    }

    /// Total number of worker threads across the cluster.
    pub fn num_workers(&self) -> usize {
        self.local_to_global.iter().map(Vec::len).sum()
    }

    /// Number of worker threads in the calling process.
    pub fn num_local_workers(&self) -> usize {
        self.num_local_workers_of(self.process_id)
    }

    /// Number of worker threads in the given process.
    pub fn num_local_workers_of(&self, process_id: usize) -> usize {
        self.local_to_global[process_id].len()
    }

    /// Process owning a global worker id.
    pub fn process_of(&self, global_tid: usize) -> usize {
        self.global_to_process
            .get(global_tid)
            .copied()
            .flatten()
            .unwrap_or_else(|| panic!("WorkerInfo: unknown global worker id {}", global_tid))
    }

    /// Global worker ids of a process, in local-id order.
    pub fn tids_of_process(&self, process_id: usize) -> &[usize] {
        &self.local_to_global[process_id]
    }

    /// Global worker ids of the calling process.
    pub fn local_tids(&self) -> &[usize] {
        self.tids_of_process(self.process_id)
    }

    /// Global worker id for a (process, local) pair.
    pub fn local_to_global(&self, process_id: usize, local_tid: usize) -> usize {
        self.local_to_global[process_id][local_tid]
    }

    /// Every global worker id, ascending.
    pub fn global_tids(&self) -> Vec<usize> {
        let mut tids: Vec<usize> = self.local_to_global.iter().flatten().copied().collect();
        tids.sort_unstable();
        tids
    }

    /// Every process id.
    pub fn process_ids(&self) -> Vec<usize> {
        (0..self.num_processes()).collect()
    }

    /// The largest registered global worker id.
    pub fn largest_tid(&self) -> usize {
        self.global_to_process.len().saturating_sub(1)
    }

    /// Hostname of a process.
    pub fn host_of(&self, process_id: usize) -> &str {
        &self.hosts[process_id]
    }
}

/// Builds the directory for `processes` machines with `workers_per_process`
/// threads each, global ids assigned process-major.
pub fn uniform_cluster(processes: usize, workers_per_process: usize) -> WorkerInfo {
    let mut info = WorkerInfo::new();
    for pid in 0..processes {
        info.add_process(pid, "localhost");
        for local in 0..workers_per_process {
            info.add_worker(pid, pid * workers_per_process + local, local);
        }
    }
    info
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_lookups() {
        let mut info = uniform_cluster(2, 3);
        info.set_process_id(1);

        assert_eq!(info.num_processes(), 2);
        assert_eq!(info.num_workers(), 6);
        assert_eq!(info.num_local_workers(), 3);
        assert_eq!(info.process_of(4), 1);
        assert_eq!(info.local_to_global(1, 1), 4);
        assert_eq!(info.tids_of_process(0), &[0, 1, 2]);
        assert_eq!(info.largest_tid(), 5);
        assert_eq!(info.global_tids(), vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    #[should_panic(expected = "duplicate global worker id")]
    fn duplicate_global_id_rejected() {
        let mut info = WorkerInfo::new();
        info.add_worker(0, 3, 0);
        info.add_worker(1, 3, 0);
    }
}
