use crate::model::ImageKind;

/// Fixed priority list used to pick a replacement primary image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimaryPromotionPolicy {
    priority: Vec<ImageKind>,
}

impl PrimaryPromotionPolicy {
    pub fn new(priority: impl Into<Vec<ImageKind>>) -> Self {
        Self {
            priority: priority.into(),
        }
    }

    /// Policy for users whose inputs carry no usable profile image.
    pub fn for_inputs() -> Self {
        Self::new([ImageKind::Additional, ImageKind::Private])
    }

    /// Policy for users who lost their primary to another owner.
    pub fn for_reassignment() -> Self {
        Self::new([ImageKind::Public, ImageKind::Additional])
    }

    /// Index of the first item of the highest-priority kind present.
    pub fn pick<T>(&self, items: &[T], kind_of: impl Fn(&T) -> ImageKind) -> Option<usize> {
        self.priority
            .iter()
            .find_map(|kind| items.iter().position(|item| kind_of(item) == *kind))
    }
}

impl Default for PrimaryPromotionPolicy {
    fn default() -> Self {
        Self::for_inputs()
    }
}
