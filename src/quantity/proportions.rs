quantity!(Percent, "%", 1);

impl Percent {
    pub const HUNDRED: Self = Self(100.0);

    pub const fn to_proportion(self) -> f64 {
        0.01 * self.0
    }

    pub fn from_proportion(proportion: f64) -> Self {
        Self(proportion * 100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proportion_round_trip() {
        assert_eq!(Percent::from_proportion(Percent(33.0).to_proportion()), Percent(33.0));
    }
}
