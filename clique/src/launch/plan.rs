use crate::config::CliqueConfig;
use crate::error::{CliqueError, Result};
use crate::reduce::Element;

/// Workers launched per execution group.
pub const WORKERS_PER_GROUP: usize = 1024;

/// Work decomposition of one launch.
///
/// Vector groups each move `elements_per_group` contiguous elements, one
/// wide vector per worker. When `count` is not a multiple of that, one extra
/// group strides over the `scalar_remainder` trailing elements.
///
/// The plan is a pure function of its inputs. Every participant derives the
/// same plan from the same `count`, which the drain step relies on: the
/// number of groups that deposit into a peer is never exchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LaunchPlan {
    pub count: usize,
    pub elements_per_vector: usize,
    pub workers_per_group: usize,
    pub elements_per_group: usize,
    pub vector_groups: usize,
    pub scalar_remainder: usize,
    pub total_groups: usize,
}

impl LaunchPlan {
    /// Plan with the platform's [`WORKERS_PER_GROUP`].
    pub fn new(count: usize, element_width: usize, vector_width: usize) -> Result<Self> {
        Self::with_workers(count, element_width, vector_width, WORKERS_PER_GROUP)
    }

    /// Plan with an explicit group size.
    pub fn with_workers(
        count: usize,
        element_width: usize,
        vector_width: usize,
        workers_per_group: usize,
    ) -> Result<Self> {
        if element_width == 0 {
            return Err(CliqueError::geometry("element width must be non-zero"));
        }
        if workers_per_group == 0 {
            return Err(CliqueError::geometry("workers per group must be non-zero"));
        }
        if vector_width < element_width || vector_width % element_width != 0 {
            return Err(CliqueError::geometry(format!(
                "vector width {vector_width} is not a multiple of element width {element_width}"
            )));
        }

        let elements_per_vector = vector_width / element_width;
        let elements_per_group = elements_per_vector
            .checked_mul(workers_per_group)
            .ok_or_else(|| {
                CliqueError::geometry(format!(
                    "{workers_per_group} workers of {elements_per_vector} elements overflow a group"
                ))
            })?;
        let vector_groups = count / elements_per_group;
        let scalar_remainder = count % elements_per_group;
        let total_groups = vector_groups + usize::from(scalar_remainder > 0);

        Ok(Self {
            count,
            elements_per_vector,
            workers_per_group,
            elements_per_group,
            vector_groups,
            scalar_remainder,
            total_groups,
        })
    }

    /// Plan for element type `T` under `config`'s vector width and group size.
    pub fn for_element<T: Element>(count: usize, config: &CliqueConfig) -> Result<Self> {
        Self::with_workers(
            count,
            T::DATA_TYPE.size_in_bytes(),
            config.vector_width_bytes,
            config.workers_per_group,
        )
    }

    /// Elements handled by vector groups; also the first scalar element.
    pub fn scalar_base(&self) -> usize {
        self.vector_groups * self.elements_per_group
    }

    /// True if group `g` is the scalar-tail group.
    pub fn is_scalar_group(&self, g: usize) -> bool {
        self.scalar_remainder > 0 && g == self.vector_groups
    }

    /// Call `f(offset, len)` for every contiguous span worker `lane` of
    /// group `g` covers, relative to the start of a rank slice.
    pub(crate) fn for_each_span(&self, g: usize, lane: usize, mut f: impl FnMut(usize, usize)) {
        if self.is_scalar_group(g) {
            let base = self.scalar_base();
            let mut id = lane;
            while id < self.scalar_remainder {
                f(base + id, 1);
                id += self.workers_per_group;
            }
        } else if g < self.vector_groups {
            let tid = g * self.workers_per_group + lane;
            f(tid * self.elements_per_vector, self.elements_per_vector);
        }
    }
}
