quantity!(Koruna, "Kč", 2);

impl Koruna {
    pub const ONE_HALER: Self = Self(0.01);
}
