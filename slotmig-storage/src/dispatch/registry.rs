use super::command_spec::{CommandArity, CommandSpec};
use super::data_command::{
    DataCommand, parse_del, parse_echo, parse_exists, parse_expire, parse_get, parse_hdel,
    parse_hget, parse_hgetall, parse_hlen, parse_hset, parse_llen, parse_lpush, parse_lrange,
    parse_persist, parse_pexpire, parse_ping, parse_pttl, parse_rpush, parse_sadd, parse_scard,
    parse_set, parse_sismember, parse_smembers, parse_srem, parse_ttl, parse_type, parse_zadd,
    parse_zcard, parse_zrange, parse_zscore,
};
use slotmig_core::command::CommandFrame;
use slotmig_core::containers::HotMap as HashMap;

/// Lookup table from command name to its arity and parser.
#[derive(Debug, Clone, Default)]
pub struct CommandTable {
    entries: HashMap<&'static str, CommandSpec>,
}

impl CommandTable {
    /// Builds an empty command table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Builds a table preloaded with every supported data command.
    #[must_use]
    pub fn with_builtin_commands() -> Self {
        let mut table = Self::new();
        table.register_keyspace_commands();
        table.register_list_commands();
        table.register_set_commands();
        table.register_hash_commands();
        table.register_zset_commands();
        table
    }

    fn register_keyspace_commands(&mut self) {
        self.add("PING", CommandArity::AtLeast(0), parse_ping);
        self.add("ECHO", CommandArity::Exact(1), parse_echo);
        self.add("SET", CommandArity::AtLeast(2), parse_set);
        self.add("GET", CommandArity::Exact(1), parse_get);
        self.add("DEL", CommandArity::AtLeast(1), parse_del);
        self.add("UNLINK", CommandArity::AtLeast(1), parse_del);
        self.add("EXISTS", CommandArity::AtLeast(1), parse_exists);
        self.add("TYPE", CommandArity::Exact(1), parse_type);
        self.add("EXPIRE", CommandArity::Exact(2), parse_expire);
        self.add("PEXPIRE", CommandArity::Exact(2), parse_pexpire);
        self.add("TTL", CommandArity::Exact(1), parse_ttl);
        self.add("PTTL", CommandArity::Exact(1), parse_pttl);
        self.add("PERSIST", CommandArity::Exact(1), parse_persist);
    }

    fn register_list_commands(&mut self) {
        self.add("RPUSH", CommandArity::AtLeast(2), parse_rpush);
        self.add("LPUSH", CommandArity::AtLeast(2), parse_lpush);
        self.add("LRANGE", CommandArity::Exact(3), parse_lrange);
        self.add("LLEN", CommandArity::Exact(1), parse_llen);
    }

    fn register_set_commands(&mut self) {
        self.add("SADD", CommandArity::AtLeast(2), parse_sadd);
        self.add("SREM", CommandArity::AtLeast(2), parse_srem);
        self.add("SMEMBERS", CommandArity::Exact(1), parse_smembers);
        self.add("SCARD", CommandArity::Exact(1), parse_scard);
        self.add("SISMEMBER", CommandArity::Exact(2), parse_sismember);
    }

    fn register_hash_commands(&mut self) {
        self.add("HSET", CommandArity::Paired { min: 3, step: 2 }, parse_hset);
        self.add("HMSET", CommandArity::Paired { min: 3, step: 2 }, parse_hset);
        self.add("HGET", CommandArity::Exact(2), parse_hget);
        self.add("HDEL", CommandArity::AtLeast(2), parse_hdel);
        self.add("HGETALL", CommandArity::Exact(1), parse_hgetall);
        self.add("HLEN", CommandArity::Exact(1), parse_hlen);
    }

    fn register_zset_commands(&mut self) {
        self.add("ZADD", CommandArity::Paired { min: 3, step: 2 }, parse_zadd);
        self.add("ZSCORE", CommandArity::Exact(2), parse_zscore);
        self.add("ZCARD", CommandArity::Exact(1), parse_zcard);
        self.add("ZRANGE", CommandArity::AtLeast(3), parse_zrange);
    }

    fn add(
        &mut self,
        name: &'static str,
        arity: CommandArity,
        parse: super::command_spec::CommandParser,
    ) {
        self.register(CommandSpec { name, arity, parse });
    }

    /// Registers or replaces one command in the table.
    pub fn register(&mut self, spec: CommandSpec) {
        let _ = self.entries.insert(spec.name, spec);
    }

    /// Validates name and arity, then parses the frame into its command variant.
    ///
    /// # Errors
    ///
    /// Returns user-facing error text for unknown names, bad arity, or malformed arguments.
    pub fn parse(&self, frame: &CommandFrame) -> Result<DataCommand, String> {
        let command_name = frame.name.to_ascii_uppercase();
        let Some(spec) = self.entries.get(command_name.as_str()) else {
            return Err(format!("unknown command '{command_name}'"));
        };
        if !spec.arity.accepts(frame.args.len()) {
            return Err(format!(
                "wrong number of arguments for '{}' command",
                spec.name
            ));
        }
        (spec.parse)(frame)
    }
}
