pub mod config;
pub mod nonstandard;

pub mod phase0 {
    pub mod consts;
    pub mod containers;
    pub mod primitives;

    mod container_impls;
}

pub mod bellatrix {
    pub mod beacon_state;
    pub mod containers;
    pub mod primitives;
}
