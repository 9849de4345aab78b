/// Hands out request correlation ids in `1..=65535`, wrapping back to 1.
#[derive(Debug, Default)]
pub struct CorrelationAllocator {
    last: u16,
}

impl CorrelationAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&mut self) -> u16 {
        self.last = (self.last % u16::MAX) + 1;
        self.last
    }
}
