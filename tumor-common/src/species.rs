use serde::{Deserialize, Serialize};

/// Species tag carried by every cell on the lattice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Species {
    Generic,
    RegularTumor,
    StemTumor,
    Immune,
}

impl Species {
    pub const TUMOR: [Species; 2] = [Species::RegularTumor, Species::StemTumor];

    #[inline]
    pub fn is_tumor(self) -> bool {
        matches!(self, Species::RegularTumor | Species::StemTumor)
    }

    pub fn name(self) -> &'static str {
        match self {
            Species::Generic => "generic",
            Species::RegularTumor => "regular_tumor",
            Species::StemTumor => "stem_tumor",
            Species::Immune => "immune",
        }
    }
}

/// The two immune flavors.
///
/// `Nk` is the conservative one-shot killer, `Ctl` the aggressive serial killer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImmuneType {
    Nk,
    Ctl,
}

impl ImmuneType {
    pub const ALL: [ImmuneType; 2] = [ImmuneType::Nk, ImmuneType::Ctl];

    pub fn name(self) -> &'static str {
        match self {
            ImmuneType::Nk => "nk",
            ImmuneType::Ctl => "ctl",
        }
    }
}
