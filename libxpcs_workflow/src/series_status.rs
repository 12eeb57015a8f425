/// Where an exposure series is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SeriesPhase {
    #[default]
    Acquiring,
    Submitted,
    Stopped,
    Done,
}

/// Progress message sent by process_series over its channel
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeriesStatus {
    /// Zero-based index of the exposure this message is about
    pub iteration: usize,
    pub total: usize,
    pub phase: SeriesPhase,
    pub file_name: String,
}

impl SeriesStatus {
    pub fn new(iteration: usize, total: usize, phase: SeriesPhase, file_name: &str) -> Self {
        Self {
            iteration,
            total,
            phase,
            file_name: file_name.to_string(),
        }
    }

    /// Fraction of the series finished
    pub fn progress(&self) -> f32 {
        if self.total == 0 {
            return 1.0;
        }
        match self.phase {
            SeriesPhase::Acquiring => self.iteration as f32 / self.total as f32,
            SeriesPhase::Submitted => (self.iteration + 1) as f32 / self.total as f32,
            SeriesPhase::Stopped | SeriesPhase::Done => 1.0,
        }
    }
}
