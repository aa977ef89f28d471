/// Install directory used when neither `--dir` nor `KILN_INSTALL_DIR` is set.
pub const DEFAULT_INSTALL_DIR: &str = ".";

/// Environment variable overriding the default install directory.
pub const INSTALL_DIR_ENV: &str = "KILN_INSTALL_DIR";

/// Prefix shared by every environment variable kiln reads.
pub const ENV_PREFIX: &str = "KILN_";

/// Lock file created inside the install directory while a build runs.
pub const LOCK_FILENAME: &str = ".kiln.lock";

/// Ignition config version written into generated configs.
pub const IGNITION_VERSION: &str = "3.2.0";

/// Upper bound on control plane replicas, in an install config and in a
/// loaded machine set.
pub const MAX_CONTROL_PLANE_REPLICAS: u32 = 9;
