//! Queue kinds, queue families, and queue selection.
//!
//! The renderer uses three kinds of queues. [`plan_queues`] maps the
//! configured count and priority of each kind onto the adapter's queue
//! families:
//!
//! - graphics: the first family with graphics support
//! - compute: a compute family without graphics if one exists, else any
//!   compute family
//! - transfer: a transfer-only family if one exists, else any family (graphics
//!   and compute families implicitly support transfer)
//!
//! Requests that land on the same family are merged into one family request.

use std::fmt;

use bitflags::bitflags;

use crate::config::QueueConfig;
use crate::error::GraphicsError;

/// The kind of work a queue is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum QueueKind {
    Graphics,
    Compute,
    Transfer,
}

impl QueueKind {
    /// All kinds in selection order.
    pub const ALL: [QueueKind; 3] = [Self::Graphics, Self::Compute, Self::Transfer];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Graphics => "graphics",
            Self::Compute => "compute",
            Self::Transfer => "transfer",
        }
    }

    fn index(self) -> usize {
        match self {
            Self::Graphics => 0,
            Self::Compute => 1,
            Self::Transfer => 2,
        }
    }
}

impl fmt::Display for QueueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

bitflags! {
    /// Operations a queue family supports.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct QueueCapabilities: u32 {
        const GRAPHICS = 1 << 0;
        const COMPUTE = 1 << 1;
        const TRANSFER = 1 << 2;
    }
}

impl QueueCapabilities {
    /// Whether the family can execute transfer commands.
    pub fn supports_transfer(&self) -> bool {
        !self.is_empty()
    }
}

/// A queue family reported by an adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueFamilyInfo {
    pub index: u32,
    pub capabilities: QueueCapabilities,
    pub queue_count: u32,
}

impl QueueFamilyInfo {
    pub fn new(index: u32, capabilities: QueueCapabilities, queue_count: u32) -> Self {
        Self {
            index,
            capabilities,
            queue_count,
        }
    }
}

/// Queues to create on one family, one priority per queue.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueFamilyRequest {
    pub family_index: u32,
    pub priorities: Vec<f32>,
}

/// Location of a queue on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueAddress {
    pub family_index: u32,
    pub queue_index: u32,
}

/// A device queue assigned to a kind of work.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Queue {
    kind: QueueKind,
    address: QueueAddress,
    priority: f32,
}

impl Queue {
    pub fn kind(&self) -> QueueKind {
        self.kind
    }

    pub fn address(&self) -> QueueAddress {
        self.address
    }

    pub fn family_index(&self) -> u32 {
        self.address.family_index
    }

    pub fn queue_index(&self) -> u32 {
        self.address.queue_index
    }

    pub fn priority(&self) -> f32 {
        self.priority
    }
}

/// Result of queue selection: what to ask the device for, and which queue
/// serves which kind.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuePlan {
    pub requests: Vec<QueueFamilyRequest>,
    queues: [Vec<Queue>; 3],
}

impl QueuePlan {
    /// All queues of `kind`, in queue index order.
    pub fn queues(&self, kind: QueueKind) -> &[Queue] {
        &self.queues[kind.index()]
    }
}

/// Pick the family serving `kind`.
pub fn select_family(families: &[QueueFamilyInfo], kind: QueueKind) -> Option<&QueueFamilyInfo> {
    let usable = || families.iter().filter(|f| f.queue_count > 0);
    match kind {
        QueueKind::Graphics => {
            usable().find(|f| f.capabilities.contains(QueueCapabilities::GRAPHICS))
        }
        QueueKind::Compute => usable()
            .find(|f| {
                f.capabilities.contains(QueueCapabilities::COMPUTE)
                    && !f.capabilities.contains(QueueCapabilities::GRAPHICS)
            })
            .or_else(|| usable().find(|f| f.capabilities.contains(QueueCapabilities::COMPUTE))),
        QueueKind::Transfer => usable()
            .find(|f| f.capabilities == QueueCapabilities::TRANSFER)
            .or_else(|| usable().find(|f| f.capabilities.supports_transfer())),
    }
}

/// Map the configured queues onto `families`.
///
/// # Errors
///
/// Returns [`GraphicsError::DeviceInit`] if no family fits a kind or a family
/// cannot provide the merged number of queues.
pub fn plan_queues(
    families: &[QueueFamilyInfo],
    config: &QueueConfig,
) -> Result<QueuePlan, GraphicsError> {
    let mut requests: Vec<QueueFamilyRequest> = Vec::new();
    let mut queues: [Vec<Queue>; 3] = Default::default();

    for kind in QueueKind::ALL {
        let settings = config.get(kind);
        let family = select_family(families, kind).ok_or_else(|| {
            GraphicsError::DeviceInit(format!("no queue family supports {kind} work"))
        })?;

        let request = match requests
            .iter_mut()
            .position(|r| r.family_index == family.index)
        {
            Some(i) => &mut requests[i],
            None => {
                requests.push(QueueFamilyRequest {
                    family_index: family.index,
                    priorities: Vec::new(),
                });
                let last = requests.len() - 1;
                &mut requests[last]
            }
        };

        for _ in 0..settings.count {
            let queue_index = request.priorities.len() as u32;
            request.priorities.push(settings.priority);
            queues[kind.index()].push(Queue {
                kind,
                address: QueueAddress {
                    family_index: family.index,
                    queue_index,
                },
                priority: settings.priority,
            });
        }

        log::debug!(
            "{} {kind} queue(s) on family {} (priority {})",
            settings.count,
            family.index,
            settings.priority
        );
    }

    for request in &requests {
        let available = families
            .iter()
            .find(|f| f.index == request.family_index)
            .map_or(0, |f| f.queue_count);
        if request.priorities.len() as u32 > available {
            return Err(GraphicsError::DeviceInit(format!(
                "queue family {} provides {} queue(s), {} requested",
                request.family_index,
                available,
                request.priorities.len()
            )));
        }
    }

    Ok(QueuePlan { requests, queues })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn discrete_gpu() -> Vec<QueueFamilyInfo> {
        vec![
            QueueFamilyInfo::new(0, QueueCapabilities::all(), 16),
            QueueFamilyInfo::new(1, QueueCapabilities::TRANSFER, 2),
            QueueFamilyInfo::new(2, QueueCapabilities::COMPUTE | QueueCapabilities::TRANSFER, 8),
        ]
    }

    #[test]
    fn test_dedicated_families_preferred() {
        let plan = plan_queues(&discrete_gpu(), &QueueConfig::default()).unwrap();
        assert_eq!(plan.queues(QueueKind::Graphics)[0].family_index(), 0);
        assert_eq!(plan.queues(QueueKind::Compute)[0].family_index(), 2);
        assert_eq!(plan.queues(QueueKind::Transfer)[0].family_index(), 1);
        assert_eq!(plan.requests.len(), 3);
        for kind in QueueKind::ALL {
            assert_eq!(plan.queues(kind).len(), 1);
            assert_eq!(plan.queues(kind)[0].priority(), 1.0);
        }
    }

    #[test]
    fn test_shared_family_requests_merge() {
        let families = vec![QueueFamilyInfo::new(0, QueueCapabilities::all(), 4)];
        let plan = plan_queues(&families, &QueueConfig::default()).unwrap();
        assert_eq!(plan.requests.len(), 1);
        assert_eq!(plan.requests[0].priorities, vec![1.0, 1.0, 1.0]);
        assert_eq!(plan.queues(QueueKind::Graphics)[0].queue_index(), 0);
        assert_eq!(plan.queues(QueueKind::Compute)[0].queue_index(), 1);
        assert_eq!(plan.queues(QueueKind::Transfer)[0].queue_index(), 2);
    }

    #[test]
    fn test_too_few_queues_fails() {
        let families = vec![QueueFamilyInfo::new(0, QueueCapabilities::all(), 1)];
        let err = plan_queues(&families, &QueueConfig::default()).unwrap_err();
        assert!(matches!(err, GraphicsError::DeviceInit(_)));
    }

    #[test]
    fn test_missing_graphics_fails() {
        let families = vec![QueueFamilyInfo::new(
            0,
            QueueCapabilities::COMPUTE | QueueCapabilities::TRANSFER,
            8,
        )];
        let err = plan_queues(&families, &QueueConfig::default()).unwrap_err();
        assert!(matches!(err, GraphicsError::DeviceInit(_)));
    }

    #[test]
    fn test_multiple_queues_per_kind() {
        let mut config = QueueConfig::default();
        config.compute.count = 3;
        config.compute.priority = 0.5;
        let plan = plan_queues(&discrete_gpu(), &config).unwrap();
        let compute = plan.queues(QueueKind::Compute);
        assert_eq!(compute.len(), 3);
        assert_eq!(compute[2].queue_index(), 2);
        assert_eq!(compute[1].priority(), 0.5);
    }
}
