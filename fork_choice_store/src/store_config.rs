use derivative::Derivative;

#[derive(Clone, Copy, Debug, Derivative)]
#[derivative(Default)]
pub struct StoreConfig {
    /// Blocks further than this from their parent are rejected.
    #[derivative(Default(value = "1024"))]
    pub max_empty_slots: u64,
}
