use std::time::Duration;

use url::{Host, Url};

use crate::cluster::topology::NodeAddr;
use crate::cluster::ClusterClient;
use crate::dispatch::{AsyncClusterClient, EventLoop};
use crate::proto::error::{Error, Result};

/// Default number of times one command may be resent after a redirect.
pub const DEFAULT_MAX_REDIRECTS: u32 = 5;

const DEFAULT_PORT: u16 = 6379;

/// How the slot map is discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RouteStrategy {
    /// Ask nodes with `CLUSTER SLOTS`.
    #[default]
    Slots,
    /// Ask nodes with `CLUSTER NODES` and parse the text listing.
    Nodes,
}

/// What a MOVED reply does to the slot map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RedirectPolicy {
    /// Reassign only the moved slot.
    #[default]
    PatchSlot,
    /// Rediscover the whole topology before resending.
    Refresh,
}

/// Settings shared by the blocking and event-loop clients.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// Nodes tried, in order, when no known node can describe the topology.
    pub seeds: Vec<NodeAddr>,
    /// How many times one command may be resent after MOVED or ASK.
    pub max_redirects: u32,
    /// Topology discovery command.
    pub route_strategy: RouteStrategy,
    /// Slot map update on MOVED.
    pub redirect_policy: RedirectPolicy,
    /// Limit for establishing a TCP connection, for both clients.
    pub connect_timeout: Option<Duration>,
    /// How long a command may wait for its reply: the socket read/write
    /// timeout of the blocking client, the reply deadline of the event-loop
    /// client.
    pub command_timeout: Option<Duration>,
    /// ACL user sent with AUTH on every new connection.
    pub username: Option<String>,
    /// Password sent with AUTH on every new connection.
    pub password: Option<String>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            seeds: Vec::new(),
            max_redirects: DEFAULT_MAX_REDIRECTS,
            route_strategy: RouteStrategy::default(),
            redirect_policy: RedirectPolicy::default(),
            connect_timeout: None,
            command_timeout: None,
            username: None,
            password: None,
        }
    }
}

/// Builder for configuring and creating cluster clients.
///
/// # Example
///
/// ```no_run
/// use clustermux::ClusterBuilder;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let mut client = ClusterBuilder::new()
///     .seeds("127.0.0.1:7000,127.0.0.1:7001")
///     .max_redirects(3)
///     .password("secret")
///     .connect()?;
/// client.set("key", "value")?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct ClusterBuilder {
    seeds: Vec<String>,
    max_redirects: Option<u32>,
    route_strategy: RouteStrategy,
    redirect_policy: RedirectPolicy,
    connect_timeout: Option<Duration>,
    command_timeout: Option<Duration>,
    username: Option<String>,
    password: Option<String>,
}

impl ClusterBuilder {
    /// Creates a new [`ClusterBuilder`] instance.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds seed nodes from a comma-separated list.
    ///
    /// Entries may be `host:port`, `[v6]:port` or `redis://[user:pass@]host:port`.
    #[inline]
    pub fn seeds(mut self, seeds: impl AsRef<str>) -> Self {
        self.seeds.extend(
            seeds
                .as_ref()
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from),
        );
        self
    }

    /// Adds one seed node.
    #[inline]
    pub fn seed(mut self, addr: &NodeAddr) -> Self {
        self.seeds.push(addr.to_string());
        self
    }

    /// Sets how many times one command may be resent after a redirect.
    #[inline]
    pub fn max_redirects(mut self, max: u32) -> Self {
        self.max_redirects = Some(max);
        self
    }

    /// Sets the topology discovery command.
    #[inline]
    pub fn route_strategy(mut self, strategy: RouteStrategy) -> Self {
        self.route_strategy = strategy;
        self
    }

    /// Sets how MOVED replies update the slot map.
    #[inline]
    pub fn redirect_policy(mut self, policy: RedirectPolicy) -> Self {
        self.redirect_policy = policy;
        self
    }

    /// Sets the TCP connect timeout.
    #[inline]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Sets how long a command may wait for its reply.
    #[inline]
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = Some(timeout);
        self
    }

    /// Sets the username for ACL authentication.
    #[inline]
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Sets the password for authentication.
    #[inline]
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Validates the settings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if no seed is given or a seed
    /// cannot be parsed.
    pub fn build(self) -> Result<ClusterConfig> {
        if self.seeds.is_empty() {
            return Err(Error::InvalidArgument {
                message: "at least one seed node is required".to_string(),
            });
        }

        let mut config = ClusterConfig {
            max_redirects: self.max_redirects.unwrap_or(DEFAULT_MAX_REDIRECTS),
            route_strategy: self.route_strategy,
            redirect_policy: self.redirect_policy,
            connect_timeout: self.connect_timeout,
            command_timeout: self.command_timeout,
            username: self.username,
            password: self.password,
            ..ClusterConfig::default()
        };

        for seed in &self.seeds {
            let parsed = parse_seed(seed)?;
            if config.password.is_none() {
                if let Some(password) = parsed.password {
                    config.password = Some(password);
                    config.username = config.username.or(parsed.username);
                }
            }
            if !config.seeds.contains(&parsed.addr) {
                config.seeds.push(parsed.addr);
            }
        }

        Ok(config)
    }

    /// Builds the configuration and connects a blocking client.
    pub fn connect(self) -> Result<ClusterClient> {
        ClusterClient::with_config(self.build()?)
    }

    /// Builds the configuration and creates an event-loop client.
    ///
    /// The initial topology is fetched with a blocking query before the
    /// event loop takes over. The connect timeout is handed to the loop with
    /// every connect; the command timeout bounds how long a queued command
    /// may wait for its reply.
    pub fn connect_async<E: EventLoop>(self, event_loop: E) -> Result<AsyncClusterClient<E>> {
        AsyncClusterClient::connect(self.build()?, event_loop)
    }
}

#[derive(Debug)]
struct Seed {
    addr: NodeAddr,
    username: Option<String>,
    password: Option<String>,
}

fn parse_seed(seed: &str) -> Result<Seed> {
    let with_scheme = if seed.contains("://") {
        seed.to_string()
    } else {
        format!("redis://{seed}")
    };

    let url = Url::parse(&with_scheme).map_err(|_| Error::InvalidArgument {
        message: format!("invalid seed address: {seed}"),
    })?;

    if url.scheme() != "redis" {
        return Err(Error::InvalidArgument {
            message: format!("invalid scheme in {seed}, expected redis://"),
        });
    }

    let host = match url.host() {
        Some(Host::Ipv6(ip)) => ip.to_string(),
        Some(Host::Ipv4(ip)) => ip.to_string(),
        Some(Host::Domain(name)) => name.to_string(),
        None => {
            return Err(Error::InvalidArgument {
                message: format!("missing host in seed {seed}"),
            })
        }
    };

    let username = Some(url.username())
        .filter(|u| !u.is_empty())
        .map(String::from);
    let password = url.password().map(String::from);

    Ok(Seed {
        addr: NodeAddr::new(host, url.port().unwrap_or(DEFAULT_PORT)),
        username,
        password,
    })
}
