//! GPU timing instrumentation.
//!
//! [`GpuTimestampManager`] owns a per-frame ring of paired timestamp
//! queries; markers pushed during command recording form a parent/depth
//! hierarchy that is resolved to milliseconds once the frame's fence has
//! signaled, from the raw query ticks. [`GpuProfiler`] aggregates resolved
//! frames host-side. Both are optional instrumentation layered on the
//! device query pool.

/// One resolved timing span.
#[derive(Debug, Clone, Default)]
pub struct GpuTimestamp {
    /// Query pool slot of the start timestamp.
    pub start: u32,
    /// Query pool slot of the end timestamp.
    pub end: u32,
    pub elapsed_ms: f64,

    pub parent_index: u16,
    pub depth: u16,

    pub frame_index: u32,
    pub name: String,
}

/// Per-frame ring of paired timestamp queries.
///
/// Queries for frame slot `f` occupy pool slots
/// `f * queries_per_frame * 2 ..` so slots in flight never collide.
pub struct GpuTimestampManager {
    timestamps: Vec<GpuTimestamp>,
    per_frame_count: Vec<u32>,

    queries_per_frame: u32,

    // Recording cursors for the frame currently being recorded.
    parent_index: u32,
    depth: u32,
}

impl GpuTimestampManager {
    pub fn new(queries_per_frame: u32, max_frames: u32) -> Self {
        let total = (queries_per_frame * max_frames) as usize;
        Self {
            timestamps: vec![GpuTimestamp::default(); total],
            per_frame_count: vec![0; max_frames as usize],
            queries_per_frame,
            parent_index: 0,
            depth: 0,
        }
    }

    /// Total number of query slots the backing pool needs.
    pub fn query_pool_size(&self) -> u32 {
        // Two slots (start/end) per timestamp.
        self.queries_per_frame * 2 * self.per_frame_count.len() as u32
    }

    /// First query slot of a frame's range.
    pub fn frame_first_query(&self, frame: u32) -> u32 {
        frame * self.queries_per_frame * 2
    }

    /// Number of query slots per frame range.
    pub fn frame_query_capacity(&self) -> u32 {
        self.queries_per_frame * 2
    }

    /// Begin recording spans for a frame slot, discarding its old spans.
    pub fn begin_frame(&mut self, frame: u32) {
        self.per_frame_count[frame as usize] = 0;
        self.parent_index = 0;
        self.depth = 0;
    }

    /// Whether a push is still missing its pop.
    pub fn has_open_spans(&self) -> bool {
        self.depth != 0
    }

    /// Open a span. Returns the query slot to write the start timestamp to,
    /// or `None` when the frame budget is spent.
    pub fn push(&mut self, frame: u32, name: &str) -> Option<u32> {
        let count = self.per_frame_count[frame as usize];
        if count >= self.queries_per_frame {
            return None;
        }

        let query_index = self.frame_first_query(frame) + count * 2;

        let timestamp_index = (frame * self.queries_per_frame + count) as usize;
        let timestamp = &mut self.timestamps[timestamp_index];
        timestamp.start = query_index;
        timestamp.end = query_index + 1;
        timestamp.parent_index = self.parent_index as u16;
        timestamp.depth = self.depth as u16;
        timestamp.frame_index = frame;
        timestamp.elapsed_ms = 0.0;
        timestamp.name.clear();
        timestamp.name.push_str(name);

        self.parent_index = count;
        self.per_frame_count[frame as usize] = count + 1;
        self.depth += 1;

        Some(query_index)
    }

    /// Close the innermost open span. Returns the query slot to write the
    /// end timestamp to.
    pub fn pop(&mut self, frame: u32) -> Option<u32> {
        if self.depth == 0 {
            return None;
        }

        let timestamp_index = (frame * self.queries_per_frame + self.parent_index) as usize;
        let timestamp = &self.timestamps[timestamp_index];
        let end_index = timestamp.end;

        self.parent_index = u32::from(timestamp.parent_index);
        self.depth -= 1;

        Some(end_index)
    }

    /// Number of spans recorded for a frame slot.
    pub fn query_count(&self, frame: u32) -> u32 {
        self.per_frame_count[frame as usize]
    }

    /// Compute elapsed times for `frame` from raw query ticks.
    ///
    /// `ticks` is indexed by absolute query slot; `timestamp_period` is
    /// nanoseconds per tick. Returns the resolved spans for the frame.
    pub fn resolve(&mut self, frame: u32, timestamp_period: f32, ticks: &[u64]) -> &[GpuTimestamp] {
        let count = self.per_frame_count[frame as usize] as usize;
        let base = (frame * self.queries_per_frame) as usize;

        for i in 0..count {
            let timestamp = &mut self.timestamps[base + i];
            let start_tick = ticks.get(timestamp.start as usize).copied().unwrap_or(0);
            let end_tick = ticks.get(timestamp.end as usize).copied().unwrap_or(start_tick);

            let elapsed_ns =
                end_tick.saturating_sub(start_tick) as f64 * f64::from(timestamp_period);
            timestamp.elapsed_ms = elapsed_ns / 1_000_000.0;
        }

        &self.timestamps[base..base + count]
    }
}

/// Host-side aggregation of resolved GPU frames.
pub struct GpuProfiler {
    frames: Vec<Vec<GpuTimestamp>>,
    max_frames: usize,
    current_frame: usize,

    pub max_time: f64,
    pub min_time: f64,
    pub average_time: f64,

    pub paused: bool,
}

impl GpuProfiler {
    pub fn new(max_frames: usize) -> Self {
        Self {
            frames: vec![Vec::new(); max_frames],
            max_frames,
            current_frame: 0,
            max_time: 0.0,
            min_time: 0.0,
            average_time: 0.0,
            paused: false,
        }
    }

    /// Record one frame of resolved timestamps.
    pub fn update(&mut self, timestamps: &[GpuTimestamp]) {
        if self.paused {
            return;
        }

        self.frames[self.current_frame] = timestamps.to_vec();
        self.current_frame = (self.current_frame + 1) % self.max_frames;

        self.recompute_statistics();
    }

    /// Toggle aggregation without dropping recorded history.
    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    /// The retained span history.
    pub fn frames(&self) -> &[Vec<GpuTimestamp>] {
        &self.frames
    }

    fn recompute_statistics(&mut self) {
        let mut min = f64::MAX;
        let mut max = 0.0f64;
        let mut sum = 0.0;
        let mut counted = 0u32;

        for frame in &self.frames {
            if frame.is_empty() {
                continue;
            }

            // Root spans only; children are included in their parents.
            let frame_total: f64 = frame
                .iter()
                .filter(|t| t.depth == 0)
                .map(|t| t.elapsed_ms)
                .sum();

            min = min.min(frame_total);
            max = max.max(frame_total);
            sum += frame_total;
            counted += 1;
        }

        if counted > 0 {
            self.min_time = min;
            self.max_time = max;
            self.average_time = sum / f64::from(counted);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_pop_builds_hierarchy() {
        let mut manager = GpuTimestampManager::new(8, 2);
        manager.begin_frame(0);

        let frame_start = manager.push(0, "frame").unwrap();
        let pass_start = manager.push(0, "geometry").unwrap();
        assert_eq!(frame_start, 0);
        assert_eq!(pass_start, 2);

        assert_eq!(manager.pop(0), Some(3));
        assert_eq!(manager.pop(0), Some(1));
        assert!(!manager.has_open_spans());
        assert_eq!(manager.query_count(0), 2);

        // Nothing left open.
        assert_eq!(manager.pop(0), None);
    }

    #[test]
    fn push_respects_frame_budget() {
        let mut manager = GpuTimestampManager::new(2, 1);
        manager.begin_frame(0);

        assert!(manager.push(0, "a").is_some());
        assert!(manager.push(0, "b").is_some());
        assert!(manager.push(0, "c").is_none());
    }

    #[test]
    fn frame_slots_use_disjoint_query_ranges() {
        let mut manager = GpuTimestampManager::new(4, 2);

        manager.begin_frame(0);
        let first = manager.push(0, "a").unwrap();
        manager.pop(0);

        manager.begin_frame(1);
        let second = manager.push(1, "a").unwrap();
        manager.pop(1);

        // Frame 1 slots start after frame 0's 2 * queries_per_frame.
        assert_eq!(first, 0);
        assert_eq!(second, 8);
        // Frame 0's spans survive while frame 1 records.
        assert_eq!(manager.query_count(0), 1);
    }

    #[test]
    fn resolve_converts_ticks_to_milliseconds() {
        let mut manager = GpuTimestampManager::new(4, 1);
        manager.begin_frame(0);

        manager.push(0, "frame");
        manager.pop(0);

        // 1000 ticks at 1000 ns per tick = 1 ms.
        let mut ticks = vec![0u64; 8];
        ticks[0] = 5_000;
        ticks[1] = 6_000;

        let resolved = manager.resolve(0, 1000.0, &ticks);
        assert_eq!(resolved.len(), 1);
        assert!((resolved[0].elapsed_ms - 1.0).abs() < 1e-9);
        assert_eq!(resolved[0].name, "frame");
    }

    #[test]
    fn nested_spans_record_parent_and_depth() {
        let mut manager = GpuTimestampManager::new(4, 1);
        manager.begin_frame(0);

        manager.push(0, "frame");
        manager.push(0, "shadow");
        manager.pop(0);
        manager.push(0, "lighting");
        manager.pop(0);
        manager.pop(0);

        let resolved = manager.resolve(0, 1.0, &[0; 8]);
        assert_eq!(resolved.len(), 3);
        assert_eq!(resolved[0].depth, 0);
        assert_eq!(resolved[1].depth, 1);
        assert_eq!(resolved[2].depth, 1);
        assert_eq!(resolved[1].parent_index, 0);
        assert_eq!(resolved[2].parent_index, 0);
    }

    #[test]
    fn profiler_tracks_min_max_average() {
        let mut profiler = GpuProfiler::new(4);

        for elapsed in [1.0, 2.0, 3.0] {
            let span = GpuTimestamp {
                elapsed_ms: elapsed,
                ..Default::default()
            };
            profiler.update(&[span]);
        }

        assert!((profiler.min_time - 1.0).abs() < 1e-9);
        assert!((profiler.max_time - 3.0).abs() < 1e-9);
        assert!((profiler.average_time - 2.0).abs() < 1e-9);
    }

    #[test]
    fn paused_profiler_ignores_updates() {
        let mut profiler = GpuProfiler::new(2);

        profiler.update(&[GpuTimestamp {
            elapsed_ms: 5.0,
            ..Default::default()
        }]);
        profiler.set_paused(true);
        profiler.update(&[GpuTimestamp {
            elapsed_ms: 100.0,
            ..Default::default()
        }]);

        assert!((profiler.max_time - 5.0).abs() < 1e-9);
    }
}
