use std::fmt;

macro_rules! gpu_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        pub struct $name(pub u64);

        impl $name {
            pub const EMPTY: Self = Self(0);

            pub fn is_empty(self) -> bool {
                self.0 == 0
            }

            pub fn raw(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}#{}", stringify!($name), self.0)
            }
        }
    };
}

gpu_handle!(
    /// Device buffer.
    BufferId
);
gpu_handle!(
    /// Device image. Views are implicit: every image has one default view.
    ImageId
);
gpu_handle!(SamplerId);
gpu_handle!(
    /// Compiled raster pipeline.
    PipelineId
);
gpu_handle!(BinarySemaphore);
gpu_handle!(TimelineSemaphore);
