/// Constants used throughout the testbench codebase
// Descriptor files
pub const DESCRIPTOR_SUFFIX: &str = ".mkosi";
pub const POSTINST_SUFFIX: &str = ".mkosi.postinst";
pub const EXTRA_DIR_SUFFIX: &str = ".mkosi.extra";
pub const EXTRA_ARCHIVE_SUFFIX: &str = ".mkosi.extra.tar";

// Persisted state, relative to the output directory
pub const IMAGE_SUFFIX: &str = ".osi";
pub const FINGERPRINT_SUFFIX: &str = ".osi.deps";
pub const CLAIM_SUFFIX: &str = ".claim";
pub const CREDENTIAL_SUFFIX: &str = ".kubeconfig";
pub const WORKING_IMAGE_SUFFIX: &str = ".tap.osi";
pub const RESULT_SUFFIX: &str = ".tap";
pub const REPORT_FILENAME: &str = "report.json";
pub const CACHE_DIRNAME: &str = "cache";
pub const LOCK_FILENAME: &str = ".testbench.lock";

// Paths inside the environment image, relative to its root
pub const IMAGE_CREDENTIAL_PATH: &str = "home/testbench/.kube/config";
pub const IMAGE_RUN_SCRIPT_PATH: &str = "etc/testbench-run";
pub const IMAGE_RESULT_PATH: &str = "var/log/testbench-run.tap";
pub const RUNNER_USER: &str = "testbench";

// Trailer appended to every result stream by the run script
pub const EXIT_TRAILER_PREFIX: &str = "# exit: ";

// Environment variable names
pub const TESTBENCH_LOG_VAR: &str = "TESTBENCH_LOG";
pub const TESTBENCH_BUILDER_VAR: &str = "TESTBENCH_BUILDER";
pub const TESTBENCH_LEASE_BROKER_VAR: &str = "TESTBENCH_LEASE_BROKER";
pub const TESTBENCH_LEASE_POOL_VAR: &str = "TESTBENCH_LEASE_POOL";
pub const TESTBENCH_MOUNT_TOOL_VAR: &str = "TESTBENCH_MOUNT_TOOL";
pub const TESTBENCH_QEMU_VAR: &str = "TESTBENCH_QEMU";
pub const TESTBENCH_OUTPUT_DIR_VAR: &str = "TESTBENCH_OUTPUT_DIR";
pub const TESTBENCH_JOBS_VAR: &str = "TESTBENCH_JOBS";
pub const TESTBENCH_FINGERPRINT_VAR: &str = "TESTBENCH_FINGERPRINT";

// External tool defaults
pub const DEFAULT_BUILDER: &str = "mkosi";
pub const DEFAULT_LEASE_BROKER: &str = "knaut";
pub const DEFAULT_LEASE_POOL: &str = "testbench";
pub const DEFAULT_MOUNT_TOOL: &str = "systemd-dissect";
pub const DEFAULT_OUTPUT_DIR: &str = "testbench.out";
