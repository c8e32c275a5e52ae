//! Resource identity scheme: four-tuple names, wildcard search.

/// Maximum allowed length for a `devmux` string, including the terminator a
/// C wire record would reserve for one. Names longer than this are rejected
/// at construction time rather than silently truncated.
pub const MAX_STR_LEN: usize = 128;

/// Which child collection a `resource` name is looked up in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    MemRegion,
    EventSrc,
}

/// A four-tuple resource identifier: `(group, device, resource, instance)`.
///
/// An empty string in `group`/`device`/`resource`, or `0` in `instance`, is
/// a wildcard when used as a search predicate. `group` and `device` must be
/// non-empty for a *registered* device, but a `ResourceId` used purely for
/// searching may leave any field as a don't-care.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ResourceId {
    pub group: String,
    pub device: String,
    pub resource: String,
    pub instance: u32,
}

impl ResourceId {
    pub fn new(
        group: impl Into<String>,
        device: impl Into<String>,
        resource: impl Into<String>,
        instance: u32,
    ) -> crate::error::Result<Self> {
        let group = group.into();
        let device = device.into();
        let resource = resource.into();
        for s in [&group, &device, &resource] {
            if s.len() >= MAX_STR_LEN {
                return Err(crate::error::DevmuxError::Invalid(
                    "resource id field exceeds MAX_STR_LEN",
                ));
            }
        }
        Ok(Self {
            group,
            device,
            resource,
            instance,
        })
    }

    /// A fully wildcarded id (matches anything).
    pub fn any() -> Self {
        Self::default()
    }

    fn is_wildcard_str(s: &str) -> bool {
        s.is_empty()
    }
}

/// Don't-care predicate matching used throughout search and dispatch:
/// `None`/empty string fields never constrain the match.
pub fn matches(
    candidate_group: &str,
    candidate_device: &str,
    candidate_instance: u32,
    want_group: &str,
    want_device: &str,
    want_instance: u32,
) -> bool {
    (ResourceId::is_wildcard_str(want_group) || want_group == candidate_group)
        && (ResourceId::is_wildcard_str(want_device) || want_device == candidate_device)
        && (want_instance == 0 || want_instance == candidate_instance)
}
