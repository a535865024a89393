//! Round-robin rotation over the working proxy set

use super::candidate::ProxyCandidate;

/// Proxies confirmed live by the last probe pass, handed out in round-robin order.
///
/// `cursor` always indexes the proxy returned by the next call to [`WorkingSet::next`] and
/// stays in `[0, len)` while the set is non-empty.
#[derive(Debug, Default, Clone)]
pub struct WorkingSet {
    proxies: Vec<ProxyCandidate>,
    cursor: usize,
}

impl WorkingSet {
    pub fn new(proxies: Vec<ProxyCandidate>) -> Self {
        Self { proxies, cursor: 0 }
    }

    /// Swap in a freshly probed set and restart rotation from the front.
    pub fn replace(&mut self, proxies: Vec<ProxyCandidate>) {
        self.proxies = proxies;
        self.cursor = 0;
    }

    /// Next proxy in rotation, or `None` when the set is empty.
    pub fn next(&mut self) -> Option<ProxyCandidate> {
        let proxy = self.proxies.get(self.cursor).cloned()?;
        self.cursor = (self.cursor + 1) % self.proxies.len();
        Some(proxy)
    }

    /// Remove the first entry equal to `proxy`. Returns whether anything was removed.
    pub fn mark_bad(&mut self, proxy: &ProxyCandidate) -> bool {
        let Some(index) = self.proxies.iter().position(|p| p == proxy) else {
            return false;
        };

        self.proxies.remove(index);
        // Entries after `index` shifted left by one.
        if index < self.cursor {
            self.cursor -= 1;
        }
        if self.cursor >= self.proxies.len() {
            self.cursor = 0;
        }
        true
    }

    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }

    pub fn proxies(&self) -> &[ProxyCandidate] {
        &self.proxies
    }
}
