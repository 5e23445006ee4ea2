/// Exponentially weighted moving average with a fixed smoothing constant.
#[derive(Debug, Clone, Copy)]
pub struct Ewma {
    alpha: f64,
    value: f64,
}

impl Ewma {
    pub fn new(alpha: f64, initial: f64) -> Self {
        Ewma {
            alpha,
            value: initial,
        }
    }

    pub fn update(&mut self, sample: f64) {
        self.value = self.alpha * sample + (1.0 - self.alpha) * self.value;
    }

    pub fn reset(&mut self, value: f64) {
        self.value = value;
    }

    pub fn value(&self) -> f64 {
        self.value
    }
}
