// Centralized metric name constants for the logship engine (writer + uploads).

#[derive(Debug, Clone, Copy)]
pub struct Metric {
    pub name: &'static str,
    #[allow(dead_code)]
    pub description: &'static str,
}

// Writer metrics
pub const LOG_APPEND_TOTAL: Metric = Metric {
    name: "logship_append_total",
    description: "Total number of records accepted by the writer",
};

pub const LOG_APPEND_BYTES_TOTAL: Metric = Metric {
    name: "logship_append_bytes_total",
    description: "Total bytes accepted by the writer",
};

pub const LOG_APPEND_REJECTED_TOTAL: Metric = Metric {
    name: "logship_append_rejected_total",
    description: "Total records rejected because storage is exhausted",
};

pub const LOG_FLUSH_LATENCY_MS: Metric = Metric {
    name: "logship_flush_latency_ms",
    description: "Latency to write buffered bytes to the active file",
};

pub const LOG_WRITE_ERROR_TOTAL: Metric = Metric {
    name: "logship_write_error_total",
    description: "Total failed writes or syncs of log files",
};

pub const LOG_FILE_ROTATE_TOTAL: Metric = Metric {
    name: "logship_file_rotate_total",
    description: "Total number of file rotations (reason={size,interval,manual,shutdown})",
};

// Upload metrics
pub const UPLOAD_FILES_TOTAL: Metric = Metric {
    name: "logship_upload_files_total",
    description: "Total upload attempts (result={ok,error,abandoned})",
};

pub const UPLOAD_BYTES_TOTAL: Metric = Metric {
    name: "logship_upload_bytes_total",
    description: "Total bytes uploaded",
};

pub const UPLOAD_LATENCY_MS: Metric = Metric {
    name: "logship_upload_latency_ms",
    description: "Latency of one upload attempt",
};

pub const UPLOAD_SKIPPED_TOTAL: Metric = Metric {
    name: "logship_upload_skipped_total",
    description: "Total sealed files kept local by gating (gate={cloud_disabled,simulator})",
};

pub const LOCAL_DELETE_TOTAL: Metric = Metric {
    name: "logship_local_delete_total",
    description: "Total number of uploaded local files deleted by retention",
};
