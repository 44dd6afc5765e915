use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// 探测进度，关闭显示时只计数
#[derive(Clone)]
pub struct ProgressTracker {
    probe_progress: Option<ProgressBar>,
    total_nodes: Arc<AtomicU64>,
    checked_nodes: Arc<AtomicU64>,
    available_nodes: Arc<AtomicU64>,
}

impl ProgressTracker {
    pub fn new(enabled: bool) -> Self {
        let probe_progress = enabled.then(|| {
            let style = ProgressStyle::with_template(
                "{spinner:.green} [{elapsed_precise}] 延迟探测: [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  ");
            let pb = ProgressBar::new(0);
            pb.set_style(style);
            pb
        });

        Self {
            probe_progress,
            total_nodes: Arc::new(AtomicU64::new(0)),
            checked_nodes: Arc::new(AtomicU64::new(0)),
            available_nodes: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn set_total_nodes(&self, total: u64) {
        self.total_nodes.store(total, Ordering::Relaxed);
        if let Some(pb) = &self.probe_progress {
            pb.set_length(total);
            pb.set_position(0);
        }
    }

    pub fn record(&self, available: bool) {
        self.checked_nodes.fetch_add(1, Ordering::Relaxed);
        if available {
            self.available_nodes.fetch_add(1, Ordering::Relaxed);
        }

        if let Some(pb) = &self.probe_progress {
            pb.inc(1);
            pb.set_message(if available { "✅" } else { "❌" });
        }
    }

    pub fn finalize(&self) {
        if let Some(pb) = &self.probe_progress {
            pb.set_position(self.total_nodes.load(Ordering::Relaxed));
            pb.finish_with_message("探测完成");
        }
    }

    pub fn get_stats(&self) -> ProgressStats {
        ProgressStats {
            total: self.total_nodes.load(Ordering::Relaxed),
            checked: self.checked_nodes.load(Ordering::Relaxed),
            available: self.available_nodes.load(Ordering::Relaxed),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.probe_progress.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressStats {
    pub total: u64,
    pub checked: u64,
    pub available: u64,
}

impl ProgressStats {
    pub fn success_rate(&self) -> f64 {
        if self.total > 0 {
            (self.available as f64 / self.total as f64) * 100.0
        } else {
            0.0
        }
    }
}
