use std::collections::{HashMap, HashSet};

/// Best-effort view of which named files exist on the head unit, plus the
/// filenames of upload/delete requests still waiting for a response.
#[derive(Debug, Default)]
pub struct RemoteFileCache {
    known: HashSet<String>,
    pending: HashMap<u16, String>,
}

impl RemoteFileCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace_all<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.known = names.into_iter().map(Into::into).collect();
    }

    pub fn mark_pending(&mut self, correlation_id: u16, filename: impl Into<String>) {
        self.pending.insert(correlation_id, filename.into());
    }

    pub fn resolve_pending(&mut self, correlation_id: u16) -> Option<String> {
        self.pending.remove(&correlation_id)
    }

    pub fn record_upload_result(&mut self, filename: &str, success: bool) {
        if success {
            self.known.insert(filename.to_string());
        }
    }

    pub fn record_delete_result(&mut self, filename: &str, success: bool) {
        if success {
            self.known.remove(filename);
        }
    }

    pub fn contains(&self, filename: &str) -> bool {
        self.known.contains(filename)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Known filenames, sorted for stable status output.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.known.iter().cloned().collect();
        names.sort();
        names
    }

    pub fn clear(&mut self) {
        self.known.clear();
        self.pending.clear();
    }
}
