//! Core traits - abstractions over external collaborators
//!
//! How a capture becomes a position is not this crate's concern: the
//! watcher hands every new capture file to a [`SampleParser`]. For testing,
//! mock implementations are provided.

use std::path::Path;

use super::types::WorldSample;
use crate::error::ParseError;

// =============================================================================
// SAMPLE PARSER
// =============================================================================

/// Turn one capture file into a world sample
///
/// Implementations must be safe to call repeatedly and must not hold a
/// handle on the file after returning.
pub trait SampleParser: Send + Sync {
    fn parse(&self, capture: &Path) -> Result<WorldSample, ParseError>;
}

impl<F> SampleParser for F
where
    F: Fn(&Path) -> Result<WorldSample, ParseError> + Send + Sync,
{
    fn parse(&self, capture: &Path) -> Result<WorldSample, ParseError> {
        self(capture)
    }
}

// =============================================================================
// TEST MOCKS
// =============================================================================

#[cfg(test)]
pub mod mocks {
    use super::*;
    use parking_lot::Mutex;
    use std::path::PathBuf;

    /// Parser that reads "x,y,z[,map]" from the file, recording every call
    #[derive(Default)]
    pub struct MockParser {
        pub calls: Mutex<Vec<PathBuf>>,
    }

    impl MockParser {
        pub fn call_count(&self) -> usize {
            self.calls.lock().len()
        }
    }

    impl SampleParser for MockParser {
        fn parse(&self, capture: &Path) -> Result<WorldSample, ParseError> {
            self.calls.lock().push(capture.to_path_buf());

            let contents = std::fs::read_to_string(capture)?;
            let fields: Vec<&str> = contents.trim().split(',').collect();
            if fields.len() < 3 {
                return Err(ParseError::MissingField("z"));
            }
            let num = |field: &'static str, s: &str| {
                s.trim().parse::<f64>().map_err(|_| ParseError::InvalidValue {
                    field,
                    value: s.to_string(),
                })
            };
            let mut sample = WorldSample::new(
                num("x", fields[0])?,
                num("y", fields[1])?,
                num("z", fields[2])?,
            );
            if let Some(map) = fields.get(3) {
                sample = sample.with_map_hint(map.trim());
            }
            Ok(sample)
        }
    }
}
