//! Metric map and capped history buffers.

use std::collections::{BTreeMap, HashMap, VecDeque};

/// Fixed-capacity buffer that evicts its oldest entry when full.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T: Clone> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    /// Appends an item, dropping the oldest one if at capacity.
    pub fn push(&mut self, item: T) {
        if self.capacity == 0 {
            return;
        }
        while self.items.len() >= self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    /// The newest `n` items, oldest first.
    pub fn latest(&self, n: usize) -> Vec<T> {
        let skip = self.items.len().saturating_sub(n);
        self.items.iter().skip(skip).cloned().collect()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Builds a tag-qualified metric key: `name[key=value,...]`.
///
/// Tags are sorted by key so the same tag set always yields the same key.
pub fn metric_key(name: &str, tags: &BTreeMap<String, String>) -> String {
    if tags.is_empty() {
        return name.to_string();
    }

    let rendered: Vec<String> = tags.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
    format!("{}[{}]", name, rendered.join(","))
}

/// Name to last-recorded value.
#[derive(Debug, Clone, Default)]
pub struct MetricsMap {
    values: HashMap<String, f64>,
}

impl MetricsMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a metric, returning the key it was stored under.
    pub fn set(&mut self, name: &str, value: f64, tags: &BTreeMap<String, String>) -> String {
        let key = metric_key(name, tags);
        self.values.insert(key.clone(), value);
        key
    }

    /// Adds `delta` to a counter, returning the key and new value.
    pub fn increment(&mut self, name: &str, delta: f64) -> (String, f64) {
        let value = self.values.entry(name.to_string()).or_insert(0.0);
        *value += delta;
        (name.to_string(), *value)
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.values.get(key).copied()
    }

    pub fn snapshot(&self) -> HashMap<String, f64> {
        self.values.clone()
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_buffer_evicts_oldest_first() {
        let mut buffer = RingBuffer::new(3);
        for i in 0..5 {
            buffer.push(i);
        }

        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.latest(10), vec![2, 3, 4]);
        assert_eq!(buffer.latest(2), vec![3, 4]);
    }

    #[test]
    fn ring_buffer_zero_capacity_stores_nothing() {
        let mut buffer = RingBuffer::new(0);
        buffer.push("x");
        assert!(buffer.is_empty());
    }

    #[test]
    fn metric_keys_are_tag_qualified_and_sorted() {
        let mut tags = BTreeMap::new();
        assert_eq!(metric_key("latency", &tags), "latency");

        tags.insert("region".to_string(), "eu".to_string());
        tags.insert("operation".to_string(), "Fetch".to_string());
        assert_eq!(metric_key("latency", &tags), "latency[operation=Fetch,region=eu]");
    }

    #[test]
    fn metrics_map_set_and_increment() {
        let mut metrics = MetricsMap::new();
        metrics.set("queue_depth", 4.0, &BTreeMap::new());
        metrics.increment("operations_total", 1.0);
        let (_, total) = metrics.increment("operations_total", 1.0);

        assert_eq!(total, 2.0);
        assert_eq!(metrics.get("queue_depth"), Some(4.0));

        metrics.clear();
        assert!(metrics.snapshot().is_empty());
    }
}
