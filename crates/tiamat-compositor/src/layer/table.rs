use std::sync::Arc;

use parking_lot::Mutex;

use super::LayerDescriptor;

/// Ordered layer stack shared between control threads and the render thread.
///
/// Updates are copy-on-write: [`replace`](Self::replace) swaps in a new
/// immutable sequence and [`snapshot`](Self::snapshot) hands out the current
/// one. A snapshot observes exactly one published table, never a mix of two,
/// and remains valid while further `replace` calls land. There is no
/// partial-field mutation; callers build a full descriptor sequence and
/// replace wholesale.
///
/// The mutex guards only the pointer swap. Neither side holds it across GPU
/// work or table construction, so `replace` never waits for a frame to
/// finish and `snapshot` never waits for a publisher.
#[derive(Clone, Default)]
pub struct LayerTable {
    current: Arc<Mutex<Arc<[LayerDescriptor]>>>,
}

impl LayerTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `layers` as the current table. Callable from any thread;
    /// last write wins.
    pub fn replace(&self, layers: Vec<LayerDescriptor>) {
        let published: Arc<[LayerDescriptor]> = layers.into();
        *self.current.lock() = published;
    }

    /// Returns the table as of some linearization point. The returned
    /// sequence is immutable and safe to iterate without synchronization.
    pub fn snapshot(&self) -> Arc<[LayerDescriptor]> {
        self.current.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::TextureKey;
    use std::thread;

    /// A 1×1 layer whose position marks which publish it belongs to.
    fn marked(marker: f32) -> LayerDescriptor {
        let mut layer = LayerDescriptor::new(TextureKey::new("t"), vec![0u8; 4], (1, 1));
        layer.position = [marker, marker];
        layer
    }

    fn marked_table(marker: f32, len: usize) -> Vec<LayerDescriptor> {
        (0..len).map(|_| marked(marker)).collect()
    }

    // ── replace / snapshot ────────────────────────────────────────────────

    #[test]
    fn starts_empty() {
        assert!(LayerTable::new().snapshot().is_empty());
    }

    #[test]
    fn snapshot_after_replace_matches_element_for_element() {
        let table = LayerTable::new();
        let published = vec![marked(1.0), marked(2.0), marked(3.0)];
        table.replace(published.clone());

        let snap = table.snapshot();
        assert_eq!(snap.len(), 3);
        for (a, b) in snap.iter().zip(&published) {
            assert_eq!(a, b);
        }
    }

    #[test]
    fn snapshot_survives_later_replace() {
        let table = LayerTable::new();
        table.replace(marked_table(1.0, 2));
        let old = table.snapshot();
        table.replace(marked_table(2.0, 5));

        // The old snapshot still sees the first publish, untouched.
        assert_eq!(old.len(), 2);
        assert_eq!(old[0].position, [1.0, 1.0]);
        assert_eq!(table.snapshot().len(), 5);
    }

    #[test]
    fn last_replace_wins() {
        let table = LayerTable::new();
        table.replace(marked_table(1.0, 1));
        table.replace(marked_table(2.0, 1));
        assert_eq!(table.snapshot()[0].position, [2.0, 2.0]);
    }

    // ── concurrency ───────────────────────────────────────────────────────

    #[test]
    fn concurrent_replace_never_tears_a_snapshot() {
        // Every published table is internally uniform (all markers equal),
        // so any mixed snapshot would show two different markers.
        let table = LayerTable::new();
        table.replace(marked_table(0.0, 8));

        let writer = {
            let table = table.clone();
            thread::spawn(move || {
                for round in 1..200 {
                    table.replace(marked_table(round as f32, 8));
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let table = table.clone();
                thread::spawn(move || {
                    for _ in 0..500 {
                        let snap = table.snapshot();
                        let first = snap[0].position[0];
                        assert!(
                            snap.iter().all(|l| l.position[0] == first),
                            "snapshot mixed two publishes"
                        );
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
    }
}
