//! CLI command definitions

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "busgate")]
#[command(about = "Authorization core for a cross-domain message bus", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Database URL
    #[arg(long, env = "DATABASE_URL", global = true)]
    pub database_url: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the busgate HTTP server
    Serve {
        /// Address to bind to
        #[arg(short, long, default_value = "0.0.0.0:8143", env = "BUSGATE_BIND")]
        bind: String,
    },

    /// Initialize the database schema
    Init,

    /// Show connectivity status
    Status,

    /// Create or update an admin user
    ///
    /// Prints the stored password hash, which is also the value the
    /// provisioning user/update endpoint expects in PWDHASH.
    Admin {
        /// Admin user name
        name: String,

        /// Admin secret (hashed before storage)
        secret: String,
    },

    /// Grant a client access to one or more buses
    ///
    /// Examples:
    ///   busgate grant --client app1 customer1.com
    ///   busgate grant --client app1 customer1.com customer2.com
    Grant {
        /// Client to grant to
        #[arg(long)]
        client: String,

        /// Bus name(s) to grant
        #[arg(required = true)]
        buses: Vec<String>,
    },

    /// Revoke a client's access to one or more buses
    Revoke {
        /// Client to revoke from
        #[arg(long)]
        client: String,

        /// Bus name(s) to revoke
        #[arg(required = true)]
        buses: Vec<String>,
    },

    /// List grants for the given clients
    Grants {
        /// Client ids to list
        #[arg(required = true)]
        clients: Vec<String>,
    },

    /// Mint a single-use authorization code for a client
    Code {
        /// Client to issue the code to
        #[arg(long)]
        client: String,

        /// Bus name(s) the code is scoped to
        #[arg(required = true)]
        buses: Vec<String>,
    },
}
