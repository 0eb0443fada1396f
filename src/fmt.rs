use std::fmt::{Debug, Display, Formatter};

/// Proportion rendered as a percentage, for example `0.882` as `88.2%`.
pub struct FormattedProportion(pub f64);

impl Debug for FormattedProportion {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}

impl Display for FormattedProportion {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.1}%", self.0 * 100.0)
    }
}
