//! Mixing of two mono 16-bit tracks into one.
//!
//! Streams sample by sample so hour-long recordings never sit in memory.

/// Combines two sample streams into one mono output.
///
/// - Averages aligned samples, so the mix can never clip
/// - Zero-pads the shorter stream
/// - Stops at the first read error and yields it
pub struct AudioMixer;

impl AudioMixer {
    pub fn mix_pair<A, B, E>(a: A, b: B) -> MixedStream<A::IntoIter, B::IntoIter>
    where
        A: IntoIterator<Item = Result<i16, E>>,
        B: IntoIterator<Item = Result<i16, E>>,
    {
        MixedStream {
            a: a.into_iter(),
            b: b.into_iter(),
            failed: false,
        }
    }

    pub fn mix_sample(a: i16, b: i16) -> i16 {
        ((i32::from(a) + i32::from(b)) / 2) as i16
    }
}

pub struct MixedStream<A, B> {
    a: A,
    b: B,
    failed: bool,
}

impl<A, B, E> Iterator for MixedStream<A, B>
where
    A: Iterator<Item = Result<i16, E>>,
    B: Iterator<Item = Result<i16, E>>,
{
    type Item = Result<i16, E>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let sample = match (self.a.next(), self.b.next()) {
            (None, None) => return None,
            (Some(Err(e)), _) | (_, Some(Err(e))) => {
                self.failed = true;
                return Some(Err(e));
            }
            (a, b) => {
                let a = a.and_then(Result::ok).unwrap_or(0);
                let b = b.and_then(Result::ok).unwrap_or(0);
                AudioMixer::mix_sample(a, b)
            }
        };
        Some(Ok(sample))
    }
}
