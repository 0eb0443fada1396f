use std::ops::{Div, Mul};

use chrono::TimeDelta;

use crate::quantity::{cost::Koruna, power::Kilowatts, proportions::Percent, rate::KorunaPerKilowattHour};

quantity!(KilowattHours, "kWh", 2);

impl KilowattHours {
    pub const ONE_WATT_HOUR: Self = Self(0.001);
}

impl Mul<KorunaPerKilowattHour> for KilowattHours {
    type Output = Koruna;

    fn mul(self, rhs: KorunaPerKilowattHour) -> Self::Output {
        Koruna(self.0 * rhs.0)
    }
}

impl Mul<Percent> for KilowattHours {
    type Output = Self;

    fn mul(self, rhs: Percent) -> Self::Output {
        self * rhs.to_proportion()
    }
}

impl Div<TimeDelta> for KilowattHours {
    type Output = Kilowatts;

    fn div(self, rhs: TimeDelta) -> Self::Output {
        let hours = rhs.as_seconds_f64() / 3600.0;
        assert!(hours.is_finite());
        Kilowatts(self.0 / hours)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_product_is_cost() {
        assert_eq!(KilowattHours(2.0) * KorunaPerKilowattHour(2.5), Koruna(5.0));
    }

    #[test]
    fn percent_scales_energy() {
        assert_eq!(KilowattHours(15.36) * Percent(50.0), KilowattHours(7.68));
    }
}
