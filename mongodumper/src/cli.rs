use std::path::PathBuf;

use clap::builder::FalseyValueParser;
use clap::{Parser, Subcommand};

use crate::config::{DumpFormat, UploadBackend};

#[derive(Parser, Debug)]
#[command(
    name = "mongodumper",
    version,
    about = "Dump a MongoDB database and upload it to object storage"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    #[command(flatten)]
    pub args: BackupArgs,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commands {
    /// Dump the database and upload the artifact (default)
    Run,
    /// Check that the dump tool and storage CLI are installed
    Check,
    /// Print the commands a run would execute, with secrets redacted
    Plan,
}

#[derive(Parser, Debug, Clone)]
pub struct BackupArgs {
    /// MongoDB connection string, takes precedence over host/port
    #[arg(long, env = "MONGO_URI", hide_env_values = true)]
    pub mongo_uri: Option<String>,

    /// MongoDB host
    #[arg(long, env = "MONGO_HOST", default_value = "localhost")]
    pub mongo_host: String,

    /// MongoDB port
    #[arg(long, env = "MONGO_PORT", default_value_t = 27017)]
    pub mongo_port: u16,

    /// MongoDB user
    #[arg(long, env = "MONGO_USERNAME")]
    pub mongo_username: Option<String>,

    /// MongoDB password
    #[arg(long, env = "MONGO_PASSWORD", hide_env_values = true)]
    pub mongo_password: Option<String>,

    /// Database holding the user's credentials
    #[arg(long, env = "MONGO_AUTH_DB")]
    pub mongo_auth_db: Option<String>,

    /// Database to dump, every database when omitted
    #[arg(long, env = "MONGO_DB")]
    pub mongo_db: Option<String>,

    /// Single collection to dump, requires --mongo-db
    #[arg(long, env = "MONGO_COLLECTION")]
    pub mongo_collection: Option<String>,

    /// Dump layout produced by mongodump
    #[arg(long, env = "DUMP_FORMAT", value_enum, default_value_t = DumpFormat::Archive)]
    pub format: DumpFormat,

    /// Scratch directory for the dump artifact
    #[arg(long, env = "DUMP_WORK_DIR", value_name = "DIR")]
    pub work_dir: Option<PathBuf>,

    /// Leave the local artifact in place after the run
    #[arg(long, env = "KEEP_ARTIFACT", value_parser = FalseyValueParser::new())]
    pub keep_artifact: bool,

    /// mongodump executable
    #[arg(long, env = "MONGODUMP_BIN", default_value = "mongodump")]
    pub mongodump_bin: String,

    /// Extra argument passed verbatim to mongodump, may be repeated
    #[arg(long = "mongodump-arg", allow_hyphen_values = true)]
    pub mongodump_args: Vec<String>,

    /// Whitespace separated extra arguments, appended after --mongodump-arg
    #[arg(long, env = "MONGODUMP_EXTRA_ARGS", allow_hyphen_values = true)]
    pub mongodump_extra_args: Option<String>,

    /// Destination bucket
    #[arg(long, env = "S3_BUCKET")]
    pub bucket: Option<String>,

    /// Key prefix inside the bucket
    #[arg(long, env = "S3_PREFIX")]
    pub prefix: Option<String>,

    /// How the artifact is uploaded
    #[arg(long, env = "UPLOAD_BACKEND", value_enum, default_value_t = UploadBackend::AwsCli)]
    pub backend: UploadBackend,

    /// aws executable used by the aws-cli backend
    #[arg(long, env = "AWS_BIN", default_value = "aws")]
    pub aws_bin: String,

    /// Custom S3 endpoint, e.g. a MinIO server
    #[arg(long, env = "S3_ENDPOINT_URL")]
    pub endpoint_url: Option<String>,

    /// Storage region
    #[arg(long, env = "AWS_REGION")]
    pub region: Option<String>,

    /// Storage class of the uploaded object
    #[arg(long, env = "S3_STORAGE_CLASS")]
    pub storage_class: Option<String>,

    /// Upload attempts before giving up
    #[arg(long, env = "UPLOAD_ATTEMPTS", default_value_t = 3)]
    pub upload_attempts: u32,

    /// Delay before the first upload retry, doubled on each retry
    #[arg(long, env = "UPLOAD_RETRY_DELAY_MS", default_value_t = 1000)]
    pub retry_delay_ms: u64,

    /// Confirm the object size after upload
    #[arg(long, env = "UPLOAD_VERIFY", value_parser = FalseyValueParser::new())]
    pub verify: bool,

    /// Webhook receiving the JSON run report
    #[arg(long, env = "NOTIFY_URL")]
    pub notify_url: Option<String>,

    /// Turn verbose logging on
    #[arg(short, long)]
    pub verbose: bool,
}
