use serde::{Deserialize, Serialize};

/// Signal type carried by a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Kind {
    Audio,
    CV,
    Event,
}

impl Kind {
    /// Audio and CV share the same sample buffer layout.
    pub fn is_sample_based(self) -> bool {
        matches!(self, Kind::Audio | Kind::CV)
    }

    pub fn can_feed(self, dest: Kind) -> bool {
        if self.is_sample_based() {
            dest.is_sample_based()
        } else {
            dest == Kind::Event
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortFlow {
    Input,
    Output,
}

#[cfg(test)]
mod tests {
    use super::Kind;

    #[test]
    fn sample_ports_are_interchangeable() {
        assert!(Kind::Audio.can_feed(Kind::CV));
        assert!(Kind::CV.can_feed(Kind::Audio));
        assert!(!Kind::Audio.can_feed(Kind::Event));
        assert!(!Kind::Event.can_feed(Kind::CV));
        assert!(Kind::Event.can_feed(Kind::Event));
    }
}
