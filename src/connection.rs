//! Connector sites, edges and attach/detach events.
//!
//! A modular robot is built from identical two-sided modules. Each module has
//! two rigid halves ([`Half::A`], [`Half::B`]) that carry named connector sites.
//! Two sites on different modules may be joined; the join is recorded as a
//! [`ConnectionEdge`] keyed by the unordered pair of its endpoints.

use crate::error::GraphError;
use crate::transform::{RigidTransform, rot_z_deg};
use glam::DMat3;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A unique identifier for a module.
pub type ModuleId = u16;

/// One of the two rigid sub-bodies of a module.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Half {
    A,
    B,
}

impl fmt::Display for Half {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::A => f.write_str("A"),
            Self::B => f.write_str("B"),
        }
    }
}

/// Identifies a connector: `(module, half, site name)`.
///
/// The derived ordering compares fields in declaration order, which is the
/// total order used to canonicalize [`EdgeKey`]s.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SiteRef {
    pub module_id: ModuleId,
    pub half: Half,
    pub site: String,
}

impl SiteRef {
    pub fn new(module_id: ModuleId, half: Half, site: impl Into<String>) -> Self {
        Self {
            module_id,
            half,
            site: site.into(),
        }
    }
}

impl fmt::Display for SiteRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.module_id, self.half, self.site)
    }
}

/// One of the four canonical 90°-spaced rotations a joined pair settles into.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub enum YawSnap {
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl YawSnap {
    /// All candidates in enumeration order. Ties are broken by this order.
    pub const ALL: [YawSnap; 4] = [Self::Deg0, Self::Deg90, Self::Deg180, Self::Deg270];

    pub fn degrees(self) -> u16 {
        match self {
            Self::Deg0 => 0,
            Self::Deg90 => 90,
            Self::Deg180 => 180,
            Self::Deg270 => 270,
        }
    }

    pub fn from_degrees(degrees: u16) -> Option<Self> {
        match degrees {
            0 => Some(Self::Deg0),
            90 => Some(Self::Deg90),
            180 => Some(Self::Deg180),
            270 => Some(Self::Deg270),
            _ => None,
        }
    }

    /// Exact rotation about the local Z axis.
    pub fn rotation(self) -> DMat3 {
        rot_z_deg(f64::from(self.degrees()))
    }
}

impl fmt::Display for YawSnap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}°", self.degrees())
    }
}

impl From<YawSnap> for u16 {
    fn from(value: YawSnap) -> Self {
        value.degrees()
    }
}

impl TryFrom<u16> for YawSnap {
    type Error = String;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Self::from_degrees(value).ok_or_else(|| format!("{value} is not a yaw snap angle"))
    }
}

/// An unordered pair of sites.
///
/// The smaller endpoint (by [`SiteRef`]'s ordering) is always stored first, so
/// `EdgeKey::new(a, b) == EdgeKey::new(b, a)` and both hash identically.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "(SiteRef, SiteRef)", into = "(SiteRef, SiteRef)")]
pub struct EdgeKey {
    a: SiteRef,
    b: SiteRef,
}

impl EdgeKey {
    pub fn new(a: SiteRef, b: SiteRef) -> Self {
        if a <= b { Self { a, b } } else { Self { a: b, b: a } }
    }

    /// The canonical first endpoint.
    pub fn a(&self) -> &SiteRef {
        &self.a
    }

    /// The canonical second endpoint.
    pub fn b(&self) -> &SiteRef {
        &self.b
    }

    pub fn contains(&self, site: &SiteRef) -> bool {
        &self.a == site || &self.b == site
    }

    /// Whether `(a, b)` is given in canonical order.
    pub fn is_canonical_order(a: &SiteRef, b: &SiteRef) -> bool {
        a <= b
    }
}

impl From<(SiteRef, SiteRef)> for EdgeKey {
    fn from((a, b): (SiteRef, SiteRef)) -> Self {
        Self::new(a, b)
    }
}

impl From<EdgeKey> for (SiteRef, SiteRef) {
    fn from(value: EdgeKey) -> Self {
        (value.a, value.b)
    }
}

impl fmt::Display for EdgeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <-> {}", self.a, self.b)
    }
}

/// The kind of a [`ConnectionEvent`], without payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Attach,
    Detach,
}

/// A request to join or separate two sites.
///
/// Attach events always carry their yaw snap and the transform from site
/// `a`'s frame to site `b`'s frame; an attach without them cannot be built.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", try_from = "RawConnectionEvent")]
pub enum ConnectionEvent {
    Attach {
        a: SiteRef,
        b: SiteRef,
        yaw_snap: YawSnap,
        transform: RigidTransform,
    },
    Detach {
        a: SiteRef,
        b: SiteRef,
    },
}

impl ConnectionEvent {
    pub fn attach(a: SiteRef, b: SiteRef, yaw_snap: YawSnap, transform: RigidTransform) -> Self {
        Self::Attach {
            a,
            b,
            yaw_snap,
            transform,
        }
    }

    pub fn detach(a: SiteRef, b: SiteRef) -> Self {
        Self::Detach { a, b }
    }

    /// Builds an event from loosely-typed parts, rejecting attach requests
    /// that lack a yaw snap or a transform.
    pub fn from_parts(
        kind: EventKind,
        a: SiteRef,
        b: SiteRef,
        yaw_snap: Option<YawSnap>,
        transform: Option<RigidTransform>,
    ) -> Result<Self, GraphError> {
        match kind {
            EventKind::Detach => Ok(Self::Detach { a, b }),
            EventKind::Attach => {
                let yaw_snap = yaw_snap.ok_or(GraphError::IncompleteAttach {
                    missing: "yaw_snap",
                })?;
                let transform = transform.ok_or(GraphError::IncompleteAttach {
                    missing: "transform",
                })?;
                Ok(Self::attach(a, b, yaw_snap, transform))
            }
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Self::Attach { .. } => EventKind::Attach,
            Self::Detach { .. } => EventKind::Detach,
        }
    }

    pub fn endpoints(&self) -> (&SiteRef, &SiteRef) {
        match self {
            Self::Attach { a, b, .. } | Self::Detach { a, b } => (a, b),
        }
    }

    pub fn key(&self) -> EdgeKey {
        let (a, b) = self.endpoints();
        EdgeKey::new(a.clone(), b.clone())
    }
}

#[derive(Deserialize)]
struct RawConnectionEvent {
    kind: EventKind,
    a: SiteRef,
    b: SiteRef,
    #[serde(default)]
    yaw_snap: Option<YawSnap>,
    #[serde(default)]
    transform: Option<RigidTransform>,
}

impl TryFrom<RawConnectionEvent> for ConnectionEvent {
    type Error = GraphError;

    fn try_from(raw: RawConnectionEvent) -> Result<Self, Self::Error> {
        Self::from_parts(raw.kind, raw.a, raw.b, raw.yaw_snap, raw.transform)
    }
}

/// Persistent record of a join. Detaching flips `active` instead of deleting.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawConnectionEdge")]
pub struct ConnectionEdge {
    pub key: EdgeKey,
    pub yaw_snap: YawSnap,

    /// Maps the canonical `b` site's frame into the canonical `a` site's frame.
    pub transform: RigidTransform,

    pub active: bool,
}

impl ConnectionEdge {
    /// Creates an active edge. `transform` maps `b`'s frame into `a`'s frame
    /// as given; it is inverted when the endpoints are swapped into canonical order.
    pub fn new(a: SiteRef, b: SiteRef, yaw_snap: YawSnap, transform: RigidTransform) -> Self {
        let transform = if EdgeKey::is_canonical_order(&a, &b) {
            transform
        } else {
            transform.inverse()
        };
        Self {
            key: EdgeKey::new(a, b),
            yaw_snap,
            transform,
            active: true,
        }
    }
}

/// A stored edge as written, endpoints in whatever order the record gives.
#[derive(Deserialize)]
struct RawConnectionEdge {
    key: (SiteRef, SiteRef),
    yaw_snap: YawSnap,
    transform: RigidTransform,
    active: bool,
}

impl From<RawConnectionEdge> for ConnectionEdge {
    fn from(raw: RawConnectionEdge) -> Self {
        let (a, b) = raw.key;
        Self {
            active: raw.active,
            ..Self::new(a, b, raw.yaw_snap, raw.transform)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::DVec3;

    #[test]
    fn edge_key_canonicalizes_by_module_then_half_then_site() {
        let lo = SiteRef::new(1, Half::B, "left");
        let hi = SiteRef::new(2, Half::A, "right");
        let key = EdgeKey::new(hi.clone(), lo.clone());
        assert_eq!(key.a(), &lo);
        assert_eq!(key.b(), &hi);

        let same_module = EdgeKey::new(SiteRef::new(3, Half::B, "a"), SiteRef::new(3, Half::A, "z"));
        assert_eq!(same_module.a().half, Half::A);
    }

    #[test]
    fn swapped_edge_inverts_transform() {
        let a = SiteRef::new(2, Half::A, "right");
        let b = SiteRef::new(1, Half::B, "left");
        let t = RigidTransform::from_translation(DVec3::new(1.0, 0.0, 0.0)).unwrap();
        let edge = ConnectionEdge::new(a, b, YawSnap::Deg0, t);
        assert_eq!(edge.key.a().module_id, 1);
        assert_eq!(edge.transform.translation(), DVec3::new(-1.0, 0.0, 0.0));
    }

    #[test]
    fn edge_record_out_of_order_is_canonicalized() {
        let json = r#"{"key":[{"module_id":2,"half":"A","site":"right"},
                              {"module_id":1,"half":"B","site":"left"}],
                       "yaw_snap":90,
                       "transform":[1,0,0,0, 0,1,0,0, 0,0,1,0, 1,0,0,1],
                       "active":false}"#;
        let edge: ConnectionEdge = serde_json::from_str(json).unwrap();
        assert_eq!(edge.key.a().module_id, 1);
        assert_eq!(edge.transform.translation(), DVec3::new(-1.0, 0.0, 0.0));
        assert_eq!(edge.yaw_snap, YawSnap::Deg90);
        assert!(!edge.active);

        // A canonical record is read back as written.
        let back: ConnectionEdge =
            serde_json::from_str(&serde_json::to_string(&edge).unwrap()).unwrap();
        assert_eq!(back, edge);
    }

    #[test]
    fn attach_without_transform_is_rejected() {
        let err = ConnectionEvent::from_parts(
            EventKind::Attach,
            SiteRef::new(1, Half::A, "right"),
            SiteRef::new(2, Half::B, "left"),
            Some(YawSnap::Deg90),
            None,
        )
        .unwrap_err();
        assert_eq!(err, GraphError::IncompleteAttach { missing: "transform" });
    }

    #[test]
    fn event_serde_validates_attach_fields() {
        let json = r#"{"kind":"attach","a":{"module_id":1,"half":"A","site":"right"},
                       "b":{"module_id":2,"half":"B","site":"left"}}"#;
        assert!(serde_json::from_str::<ConnectionEvent>(json).is_err());

        let json = r#"{"kind":"detach","a":{"module_id":1,"half":"A","site":"right"},
                       "b":{"module_id":2,"half":"B","site":"left"}}"#;
        let ev: ConnectionEvent = serde_json::from_str(json).unwrap();
        assert_eq!(ev.kind(), EventKind::Detach);

        let attach = ConnectionEvent::attach(
            SiteRef::new(1, Half::A, "right"),
            SiteRef::new(2, Half::B, "left"),
            YawSnap::Deg270,
            RigidTransform::IDENTITY,
        );
        let back: ConnectionEvent =
            serde_json::from_str(&serde_json::to_string(&attach).unwrap()).unwrap();
        assert_eq!(back, attach);
    }

    #[test]
    fn yaw_snap_rejects_off_grid_degrees() {
        assert!(serde_json::from_str::<YawSnap>("45").is_err());
        assert_eq!(serde_json::from_str::<YawSnap>("180").unwrap(), YawSnap::Deg180);
    }
}
