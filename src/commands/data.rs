//! Data Commands
//!
//! Commands that only read or modify the keyspace: strings, lists, sorted
//! sets, geo and streams. They run against a [`Keyspace`] the caller has
//! already locked, which lets `EXEC` run a whole queue under one lock.
//!
//! Every numeric argument is parsed here and rejected with a
//! [`CommandError`] before anything is modified.

use super::error::CommandError;
use crate::protocol::{Frame, RespValue};
use crate::storage::geo::{self, Coordinates};
use crate::storage::{IdRequest, Keyspace, StreamId};
use bytes::Bytes;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

pub type CommandResult = Result<RespValue, CommandError>;

/// Commands that modify the keyspace. On a leader these are propagated.
const WRITE_COMMANDS: &[&str] = &[
    "SET", "DEL", "INCR", "LPUSH", "RPUSH", "LPOP", "ZADD", "ZREM", "GEOADD", "XADD",
];

pub fn is_write(name: &str) -> bool {
    WRITE_COMMANDS.contains(&name)
}

/// Wall-clock milliseconds, used for automatic stream ids.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Executes a data command. `now_ms` feeds `XADD *`.
pub fn execute(ks: &mut Keyspace, frame: &Frame, now_ms: u64) -> CommandResult {
    let args = frame.args();
    match frame.name().as_str() {
        // Strings and keys
        "SET" => cmd_set(ks, args),
        "GET" => cmd_get(ks, args),
        "INCR" => cmd_incr(ks, args),
        "DEL" => cmd_del(ks, args),
        "KEYS" => cmd_keys(ks, args),
        "TYPE" => cmd_type(ks, args),

        // Lists
        "LPUSH" => cmd_push(ks, args, "lpush"),
        "RPUSH" => cmd_push(ks, args, "rpush"),
        "LPOP" => cmd_lpop(ks, args),
        "LLEN" => cmd_llen(ks, args),
        "LRANGE" => cmd_lrange(ks, args),

        // Sorted sets
        "ZADD" => cmd_zadd(ks, args),
        "ZRANK" => cmd_zrank(ks, args),
        "ZRANGE" => cmd_zrange(ks, args),
        "ZCARD" => cmd_zcard(ks, args),
        "ZSCORE" => cmd_zscore(ks, args),
        "ZREM" => cmd_zrem(ks, args),

        // Geo
        "GEOADD" => cmd_geoadd(ks, args),
        "GEOPOS" => cmd_geopos(ks, args),
        "GEODIST" => cmd_geodist(ks, args),
        "GEOSEARCH" => cmd_geosearch(ks, args),

        // Streams
        "XADD" => cmd_xadd(ks, args, now_ms),
        "XRANGE" => cmd_xrange(ks, args),

        _ => Err(CommandError::UnknownCommand(
            frame
                .parts()
                .first()
                .map(|name| String::from_utf8_lossy(name).into_owned())
                .unwrap_or_default(),
        )),
    }
}

// ============================================================================
// Argument helpers
// ============================================================================

fn exact(args: &[Bytes], n: usize, command: &str) -> Result<(), CommandError> {
    if args.len() != n {
        return Err(CommandError::arity(command));
    }
    Ok(())
}

fn at_least(args: &[Bytes], n: usize, command: &str) -> Result<(), CommandError> {
    if args.len() < n {
        return Err(CommandError::arity(command));
    }
    Ok(())
}

fn arg(args: &[Bytes], index: usize) -> Result<&Bytes, CommandError> {
    args.get(index).ok_or(CommandError::Syntax)
}

fn option(arg: &[u8]) -> String {
    String::from_utf8_lossy(arg).to_ascii_uppercase()
}

fn int_arg(arg: &[u8]) -> Result<i64, CommandError> {
    std::str::from_utf8(arg)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(CommandError::NotInteger)
}

fn count_arg(arg: &[u8]) -> Result<usize, CommandError> {
    let n = int_arg(arg)?;
    usize::try_from(n).map_err(|_| CommandError::OutOfRange("value"))
}

fn float_arg(arg: &[u8]) -> Result<f64, CommandError> {
    std::str::from_utf8(arg)
        .ok()
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|f| !f.is_nan())
        .ok_or(CommandError::NotFloat)
}

fn optional_bulk(value: Option<Bytes>) -> RespValue {
    value.map_or_else(RespValue::null, RespValue::bulk_string)
}

// ============================================================================
// Strings and keys
// ============================================================================

/// SET key value [PX milliseconds | EX seconds]
fn cmd_set(ks: &mut Keyspace, args: &[Bytes]) -> CommandResult {
    at_least(args, 2, "set")?;

    let mut ttl = None;
    let mut options = args[2..].iter();
    while let Some(opt) = options.next() {
        let unit: fn(u64) -> Duration = match option(opt).as_str() {
            "PX" => Duration::from_millis,
            "EX" => Duration::from_secs,
            _ => return Err(CommandError::Syntax),
        };
        if ttl.is_some() {
            return Err(CommandError::Syntax);
        }
        let amount = int_arg(options.next().ok_or(CommandError::Syntax)?)?;
        if amount <= 0 {
            return Err(CommandError::InvalidExpireTime("set".to_string()));
        }
        ttl = Some(unit(amount as u64));
    }

    let expires_at = match ttl {
        Some(ttl) => Some(
            Instant::now()
                .checked_add(ttl)
                .ok_or_else(|| CommandError::InvalidExpireTime("set".to_string()))?,
        ),
        None => None,
    };
    ks.set(args[0].clone(), args[1].clone(), expires_at);
    Ok(RespValue::ok())
}

fn cmd_get(ks: &mut Keyspace, args: &[Bytes]) -> CommandResult {
    exact(args, 1, "get")?;
    Ok(optional_bulk(ks.get(&args[0])?))
}

fn cmd_incr(ks: &mut Keyspace, args: &[Bytes]) -> CommandResult {
    exact(args, 1, "incr")?;
    Ok(RespValue::integer(ks.incr(&args[0])?))
}

/// DEL key [key ...]
fn cmd_del(ks: &mut Keyspace, args: &[Bytes]) -> CommandResult {
    at_least(args, 1, "del")?;
    let removed = args
        .iter()
        .filter(|key| {
            let live = ks.get_value(key).is_some();
            ks.delete(key) && live
        })
        .count();
    Ok(RespValue::integer(removed as i64))
}

/// KEYS pattern. Only `*` matches anything.
fn cmd_keys(ks: &mut Keyspace, args: &[Bytes]) -> CommandResult {
    exact(args, 1, "keys")?;
    if &args[0][..] != b"*" {
        return Ok(RespValue::array(Vec::new()));
    }
    let mut keys = ks.keys();
    keys.sort();
    Ok(RespValue::bulk_array(keys))
}

fn cmd_type(ks: &mut Keyspace, args: &[Bytes]) -> CommandResult {
    exact(args, 1, "type")?;
    Ok(RespValue::simple_string(ks.key_type(&args[0])))
}

// ============================================================================
// Lists
// ============================================================================

/// LPUSH / RPUSH key value [value ...]
fn cmd_push(ks: &mut Keyspace, args: &[Bytes], command: &str) -> CommandResult {
    at_least(args, 2, command)?;
    let len = if command == "lpush" {
        ks.lpush(&args[0], &args[1..])?
    } else {
        ks.rpush(&args[0], &args[1..])?
    };
    Ok(RespValue::integer(len as i64))
}

/// LPOP key [count]
fn cmd_lpop(ks: &mut Keyspace, args: &[Bytes]) -> CommandResult {
    let count = match args.len() {
        1 => None,
        2 => Some(count_arg(&args[1])?),
        _ => return Err(CommandError::arity("lpop")),
    };

    let popped = match ks.lpop(&args[0], count.unwrap_or(1))? {
        Some(popped) => popped,
        None => return Ok(RespValue::null()),
    };

    Ok(match count {
        None | Some(1) => optional_bulk(popped.into_iter().next()),
        Some(_) => RespValue::bulk_array(popped),
    })
}

fn cmd_llen(ks: &mut Keyspace, args: &[Bytes]) -> CommandResult {
    exact(args, 1, "llen")?;
    Ok(RespValue::integer(ks.llen(&args[0])? as i64))
}

fn cmd_lrange(ks: &mut Keyspace, args: &[Bytes]) -> CommandResult {
    exact(args, 3, "lrange")?;
    let (start, stop) = (int_arg(&args[1])?, int_arg(&args[2])?);
    Ok(RespValue::bulk_array(ks.lrange(&args[0], start, stop)?))
}

// ============================================================================
// Sorted sets
// ============================================================================

/// ZADD key score member [score member ...]
fn cmd_zadd(ks: &mut Keyspace, args: &[Bytes]) -> CommandResult {
    at_least(args, 3, "zadd")?;
    if (args.len() - 1) % 2 != 0 {
        return Err(CommandError::Syntax);
    }

    let pairs = args[1..]
        .chunks(2)
        .map(|pair| Ok((float_arg(&pair[0])?, pair[1].clone())))
        .collect::<Result<Vec<_>, CommandError>>()?;

    Ok(RespValue::integer(ks.zadd(&args[0], pairs)? as i64))
}

fn cmd_zrank(ks: &mut Keyspace, args: &[Bytes]) -> CommandResult {
    exact(args, 2, "zrank")?;
    Ok(ks
        .zrank(&args[0], &args[1])?
        .map_or_else(RespValue::null, |rank| RespValue::integer(rank as i64)))
}

fn cmd_zrange(ks: &mut Keyspace, args: &[Bytes]) -> CommandResult {
    exact(args, 3, "zrange")?;
    let (start, stop) = (int_arg(&args[1])?, int_arg(&args[2])?);
    Ok(RespValue::bulk_array(ks.zrange(&args[0], start, stop)?))
}

fn cmd_zcard(ks: &mut Keyspace, args: &[Bytes]) -> CommandResult {
    exact(args, 1, "zcard")?;
    Ok(RespValue::integer(ks.zcard(&args[0])? as i64))
}

fn cmd_zscore(ks: &mut Keyspace, args: &[Bytes]) -> CommandResult {
    exact(args, 2, "zscore")?;
    Ok(optional_bulk(
        ks.zscore(&args[0], &args[1])?
            .map(|score| Bytes::from(score.to_string())),
    ))
}

fn cmd_zrem(ks: &mut Keyspace, args: &[Bytes]) -> CommandResult {
    at_least(args, 2, "zrem")?;
    Ok(RespValue::integer(ks.zrem(&args[0], &args[1..])? as i64))
}

// ============================================================================
// Geo
// ============================================================================

/// GEOADD key longitude latitude member [longitude latitude member ...]
fn cmd_geoadd(ks: &mut Keyspace, args: &[Bytes]) -> CommandResult {
    at_least(args, 4, "geoadd")?;
    if (args.len() - 1) % 3 != 0 {
        return Err(CommandError::Syntax);
    }

    let mut pairs = Vec::with_capacity(args.len() / 3);
    for triple in args[1..].chunks(3) {
        let (longitude, latitude) = (float_arg(&triple[0])?, float_arg(&triple[1])?);
        if !geo::is_valid(longitude, latitude) {
            return Err(CommandError::InvalidCoordinates(longitude, latitude));
        }
        pairs.push((geo::encode(longitude, latitude) as f64, triple[2].clone()));
    }

    Ok(RespValue::integer(ks.zadd(&args[0], pairs)? as i64))
}

fn position(ks: &Keyspace, key: &[u8], member: &[u8]) -> Result<Option<Coordinates>, CommandError> {
    Ok(ks.zscore(key, member)?.and_then(geo::decode_score))
}

/// GEOPOS key member [member ...]
fn cmd_geopos(ks: &mut Keyspace, args: &[Bytes]) -> CommandResult {
    at_least(args, 2, "geopos")?;
    let positions = args[1..]
        .iter()
        .map(|member| {
            Ok(match position(ks, &args[0], member)? {
                Some(at) => RespValue::bulk_array([at.longitude.to_string(), at.latitude.to_string()]),
                None => RespValue::null_array(),
            })
        })
        .collect::<Result<Vec<_>, CommandError>>()?;
    Ok(RespValue::array(positions))
}

/// GEODIST key member1 member2 [m|km|mi|ft]
fn cmd_geodist(ks: &mut Keyspace, args: &[Bytes]) -> CommandResult {
    if !(3..=4).contains(&args.len()) {
        return Err(CommandError::arity("geodist"));
    }
    let factor = args
        .get(3)
        .map_or(1.0, |unit| geo::unit_factor(&String::from_utf8_lossy(unit)));

    let a = position(ks, &args[0], &args[1])?;
    let b = position(ks, &args[0], &args[2])?;
    Ok(match (a, b) {
        (Some(a), Some(b)) => {
            RespValue::bulk_string(format!("{:.4}", geo::distance(a, b) / factor))
        }
        _ => RespValue::null(),
    })
}

enum Origin {
    LonLat(f64, f64),
    Member(Bytes),
}

/// GEOSEARCH key FROMLONLAT lon lat | FROMMEMBER member BYRADIUS radius unit [ASC]
///
/// Members in the same geohash cell as the centre always match, so a zero
/// radius still finds coincident points.
fn cmd_geosearch(ks: &mut Keyspace, args: &[Bytes]) -> CommandResult {
    at_least(args, 1, "geosearch")?;

    let mut origin = None;
    let mut radius = None;
    let mut i = 1;
    while i < args.len() {
        match option(&args[i]).as_str() {
            "FROMLONLAT" => {
                let longitude = float_arg(arg(args, i + 1)?)?;
                let latitude = float_arg(arg(args, i + 2)?)?;
                if !geo::is_valid(longitude, latitude) {
                    return Err(CommandError::InvalidCoordinates(longitude, latitude));
                }
                origin = Some(Origin::LonLat(longitude, latitude));
                i += 3;
            }
            "FROMMEMBER" => {
                origin = Some(Origin::Member(arg(args, i + 1)?.clone()));
                i += 2;
            }
            "BYRADIUS" => {
                let r = float_arg(arg(args, i + 1)?)?;
                if r < 0.0 {
                    return Err(CommandError::OutOfRange("radius"));
                }
                let unit = String::from_utf8_lossy(arg(args, i + 2)?).into_owned();
                radius = Some(r * geo::unit_factor(&unit));
                i += 3;
            }
            "ASC" => i += 1,
            _ => return Err(CommandError::Syntax),
        }
    }

    let (origin, radius) = match (origin, radius) {
        (Some(origin), Some(radius)) => (origin, radius),
        _ => return Err(CommandError::Syntax),
    };

    let set = match ks.sorted_set(&args[0])? {
        Some(set) => set,
        None => return Ok(RespValue::array(Vec::new())),
    };

    let (centre_hash, centre) = match origin {
        Origin::LonLat(longitude, latitude) => (
            geo::encode(longitude, latitude),
            Coordinates { longitude, latitude },
        ),
        Origin::Member(member) => {
            let score = set.score(&member).ok_or(CommandError::NoSuchMember)?;
            let centre = geo::decode_score(score).ok_or(CommandError::NoSuchMember)?;
            (score as u64, centre)
        }
    };

    let mut hits: Vec<(f64, &Bytes)> = set
        .iter()
        .filter_map(|(member, score)| {
            let at = geo::decode_score(score)?;
            let d = geo::distance(centre, at);
            (score as u64 == centre_hash || d <= radius).then_some((d, member))
        })
        .collect();
    hits.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(b.1)));

    Ok(RespValue::bulk_array(
        hits.into_iter().map(|(_, member)| member.clone()),
    ))
}

// ============================================================================
// Streams
// ============================================================================

/// XADD key id field value [field value ...]
fn cmd_xadd(ks: &mut Keyspace, args: &[Bytes], now_ms: u64) -> CommandResult {
    if args.len() < 4 || args.len() % 2 != 0 {
        return Err(CommandError::arity("xadd"));
    }

    let request = IdRequest::parse(&args[1])?;
    let fields = args[2..]
        .chunks(2)
        .map(|pair| (pair[0].clone(), pair[1].clone()))
        .collect();

    let id = ks.xadd(&args[0], request, fields, now_ms)?;
    Ok(RespValue::bulk_string(id.to_string()))
}

/// XRANGE key start end [COUNT n]
fn cmd_xrange(ks: &mut Keyspace, args: &[Bytes]) -> CommandResult {
    let count = match args.len() {
        3 => None,
        5 if option(&args[3]) == "COUNT" => Some(count_arg(&args[4])?),
        5 => return Err(CommandError::Syntax),
        _ => return Err(CommandError::arity("xrange")),
    };

    let start = match &args[1][..] {
        b"-" => StreamId::ZERO,
        s => StreamId::parse(s, 0)?,
    };
    let end = match &args[2][..] {
        b"+" => StreamId::MAX,
        s => StreamId::parse(s, u64::MAX)?,
    };

    let entries = ks
        .xrange(&args[0], start, end, count)?
        .into_iter()
        .map(|(id, fields)| {
            RespValue::array(vec![
                RespValue::bulk_string(id.to_string()),
                RespValue::bulk_array(fields.into_iter().flat_map(|(f, v)| [f, v])),
            ])
        })
        .collect();
    Ok(RespValue::array(entries))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(ks: &mut Keyspace, args: &[&str]) -> RespValue {
        execute(ks, &Frame::from_strs(args), 1_000)
            .unwrap_or_else(RespValue::from)
    }

    fn bulk(s: &str) -> RespValue {
        RespValue::bulk_string(Bytes::from(s.to_string()))
    }

    fn bulks(items: &[&str]) -> RespValue {
        RespValue::bulk_array(items.iter().map(|s| Bytes::from(s.to_string())))
    }

    #[test]
    fn test_set_get_and_options() {
        let mut ks = Keyspace::new();
        assert_eq!(run(&mut ks, &["SET", "k", "v"]), RespValue::ok());
        assert_eq!(run(&mut ks, &["GET", "k"]), bulk("v"));
        assert_eq!(run(&mut ks, &["GET", "missing"]), RespValue::null());

        assert_eq!(run(&mut ks, &["SET", "k", "v", "EX", "100"]), RespValue::ok());
        assert_eq!(
            run(&mut ks, &["SET", "k", "v", "PX", "abc"]),
            RespValue::error("ERR value is not an integer or out of range")
        );
        assert_eq!(
            run(&mut ks, &["SET", "k", "v", "PX", "0"]),
            RespValue::error("ERR invalid expire time in 'set' command")
        );
        assert_eq!(
            run(&mut ks, &["SET", "k", "v", "NX"]),
            RespValue::error("ERR syntax error")
        );
        assert_eq!(
            run(&mut ks, &["GET"]),
            RespValue::error("ERR wrong number of arguments for 'get' command")
        );
    }

    #[test]
    fn test_set_expire_past_clock_range() {
        let mut ks = Keyspace::new();
        run(&mut ks, &["SET", "k", "old"]);
        assert_eq!(
            run(&mut ks, &["SET", "k", "v", "EX", "9223372036854775807"]),
            RespValue::error("ERR invalid expire time in 'set' command")
        );
        assert_eq!(run(&mut ks, &["GET", "k"]), bulk("old"));
    }

    #[test]
    fn test_lazy_expiry_keeps_key_listed() {
        let mut ks = Keyspace::new();
        run(&mut ks, &["SET", "k", "v", "PX", "1"]);
        std::thread::sleep(Duration::from_millis(5));

        assert_eq!(run(&mut ks, &["GET", "k"]), RespValue::null());
        assert_eq!(run(&mut ks, &["TYPE", "k"]), RespValue::simple_string("none"));
        assert_eq!(run(&mut ks, &["KEYS", "*"]), bulks(&["k"]));
        assert_eq!(run(&mut ks, &["DEL", "k"]), RespValue::integer(0));
    }

    #[test]
    fn test_keys_only_matches_star() {
        let mut ks = Keyspace::new();
        run(&mut ks, &["SET", "b", "1"]);
        run(&mut ks, &["SET", "a", "1"]);
        assert_eq!(run(&mut ks, &["KEYS", "*"]), bulks(&["a", "b"]));
        assert_eq!(run(&mut ks, &["KEYS", "a*"]), RespValue::array(vec![]));
    }

    #[test]
    fn test_incr() {
        let mut ks = Keyspace::new();
        assert_eq!(run(&mut ks, &["INCR", "n"]), RespValue::integer(1));
        assert_eq!(run(&mut ks, &["INCR", "n"]), RespValue::integer(2));

        run(&mut ks, &["SET", "s", "abc"]);
        assert_eq!(
            run(&mut ks, &["INCR", "s"]),
            RespValue::error("ERR value is not an integer or out of range")
        );
        assert_eq!(run(&mut ks, &["GET", "s"]), bulk("abc"));
    }

    #[test]
    fn test_push_order() {
        let mut ks = Keyspace::new();
        assert_eq!(run(&mut ks, &["LPUSH", "l", "a", "b", "c"]), RespValue::integer(3));
        assert_eq!(run(&mut ks, &["LRANGE", "l", "0", "-1"]), bulks(&["c", "b", "a"]));

        run(&mut ks, &["RPUSH", "r", "a", "b", "c"]);
        assert_eq!(run(&mut ks, &["LRANGE", "r", "0", "-1"]), bulks(&["a", "b", "c"]));
        assert_eq!(run(&mut ks, &["LRANGE", "r", "-2", "10"]), bulks(&["b", "c"]));
        assert_eq!(run(&mut ks, &["LRANGE", "r", "2", "1"]), bulks(&[]));
        assert_eq!(run(&mut ks, &["LLEN", "r"]), RespValue::integer(3));
    }

    #[test]
    fn test_lpop_shapes() {
        let mut ks = Keyspace::new();
        run(&mut ks, &["RPUSH", "l", "a", "b", "c", "d"]);

        assert_eq!(run(&mut ks, &["LPOP", "l"]), bulk("a"));
        assert_eq!(run(&mut ks, &["LPOP", "l", "1"]), bulk("b"));
        assert_eq!(run(&mut ks, &["LPOP", "l", "0"]), bulks(&[]));
        assert_eq!(run(&mut ks, &["LPOP", "l", "10"]), bulks(&["c", "d"]));
        assert_eq!(run(&mut ks, &["LPOP", "l"]), RespValue::null());
        assert_eq!(run(&mut ks, &["TYPE", "l"]), RespValue::simple_string("none"));

        run(&mut ks, &["RPUSH", "l", "x"]);
        assert_eq!(
            run(&mut ks, &["LPOP", "l", "-1"]),
            RespValue::error("ERR value is out of range, must be positive")
        );
        assert_eq!(
            run(&mut ks, &["LPOP", "l", "two"]),
            RespValue::error("ERR value is not an integer or out of range")
        );
    }

    #[test]
    fn test_wrong_type_leaves_value() {
        let mut ks = Keyspace::new();
        run(&mut ks, &["SET", "k", "v"]);
        let wrongtype =
            RespValue::error("WRONGTYPE Operation against a key holding the wrong kind of value");

        assert_eq!(run(&mut ks, &["LPUSH", "k", "x"]), wrongtype);
        assert_eq!(run(&mut ks, &["XADD", "k", "1-1", "f", "v"]), wrongtype);
        assert_eq!(run(&mut ks, &["ZADD", "k", "1", "m"]), wrongtype);
        assert_eq!(run(&mut ks, &["GET", "k"]), bulk("v"));
    }

    #[test]
    fn test_sorted_set_commands() {
        let mut ks = Keyspace::new();
        assert_eq!(run(&mut ks, &["ZADD", "z", "2", "b", "1", "a"]), RespValue::integer(2));
        assert_eq!(run(&mut ks, &["ZADD", "z", "1", "c"]), RespValue::integer(1));
        assert_eq!(run(&mut ks, &["ZADD", "z", "3", "a"]), RespValue::integer(0));

        assert_eq!(run(&mut ks, &["ZRANGE", "z", "0", "-1"]), bulks(&["c", "b", "a"]));
        assert_eq!(run(&mut ks, &["ZRANK", "z", "a"]), RespValue::integer(2));
        assert_eq!(run(&mut ks, &["ZRANK", "z", "nope"]), RespValue::null());
        assert_eq!(run(&mut ks, &["ZSCORE", "z", "b"]), bulk("2"));
        assert_eq!(run(&mut ks, &["ZSCORE", "z", "nope"]), RespValue::null());
        assert_eq!(run(&mut ks, &["ZCARD", "z"]), RespValue::integer(3));

        assert_eq!(
            run(&mut ks, &["ZADD", "z", "x", "m"]),
            RespValue::error("ERR value is not a valid float")
        );
        assert_eq!(run(&mut ks, &["ZREM", "z", "a", "b", "c"]), RespValue::integer(3));
        assert_eq!(run(&mut ks, &["TYPE", "z"]), RespValue::simple_string("none"));
    }

    #[test]
    fn test_geo_palermo_catania() {
        let mut ks = Keyspace::new();
        assert_eq!(
            run(
                &mut ks,
                &["GEOADD", "Sicily", "13.361389", "38.115556", "Palermo", "15.087269", "37.502669", "Catania"]
            ),
            RespValue::integer(2)
        );

        assert_eq!(run(&mut ks, &["ZSCORE", "Sicily", "Palermo"]), bulk("3479099956230698"));
        assert_eq!(
            run(&mut ks, &["GEODIST", "Sicily", "Palermo", "Catania"]),
            bulk("166274.1516")
        );
        assert_eq!(
            run(&mut ks, &["GEODIST", "Sicily", "Palermo", "Catania", "km"]),
            bulk("166.2742")
        );
        assert_eq!(
            run(&mut ks, &["GEODIST", "Sicily", "Palermo", "Rome"]),
            RespValue::null()
        );

        let positions = run(&mut ks, &["GEOPOS", "Sicily", "Palermo", "Rome"]);
        let positions = positions.as_array().unwrap();
        let lon: f64 = positions[0].as_array().unwrap()[0].as_str().unwrap().parse().unwrap();
        assert!((lon - 13.361389).abs() < 1e-4);
        assert_eq!(positions[1], RespValue::null_array());

        assert_eq!(
            run(
                &mut ks,
                &["GEOSEARCH", "Sicily", "FROMLONLAT", "15", "37", "BYRADIUS", "200", "km"]
            ),
            bulks(&["Catania", "Palermo"])
        );
        assert_eq!(
            run(
                &mut ks,
                &["GEOSEARCH", "Sicily", "FROMMEMBER", "Palermo", "BYRADIUS", "100", "km"]
            ),
            bulks(&["Palermo"])
        );
    }

    #[test]
    fn test_geo_coincident_points() {
        let mut ks = Keyspace::new();
        run(&mut ks, &["GEOADD", "g", "2.35", "48.85", "a", "2.35", "48.85", "b", "10", "10", "c"]);

        assert_eq!(run(&mut ks, &["GEODIST", "g", "a", "b"]), bulk("0.0000"));
        assert_eq!(
            run(&mut ks, &["GEOSEARCH", "g", "FROMLONLAT", "2.35", "48.85", "BYRADIUS", "0", "m"]),
            bulks(&["a", "b"])
        );
    }

    #[test]
    fn test_geo_rejects_out_of_range() {
        let mut ks = Keyspace::new();
        assert_eq!(
            run(&mut ks, &["GEOADD", "g", "181", "0", "x"]),
            RespValue::error("ERR invalid longitude,latitude pair 181.000000,0.000000")
        );
        assert_eq!(
            run(&mut ks, &["GEOADD", "g", "0", "85.1", "x"]),
            RespValue::error("ERR invalid longitude,latitude pair 0.000000,85.100000")
        );
        assert_eq!(run(&mut ks, &["TYPE", "g"]), RespValue::simple_string("none"));
    }

    #[test]
    fn test_xadd_sequence() {
        let mut ks = Keyspace::new();
        assert_eq!(run(&mut ks, &["XADD", "s", "0-*", "f", "v"]), bulk("0-1"));
        assert_eq!(run(&mut ks, &["XADD", "s", "5-1", "f", "v"]), bulk("5-1"));
        assert_eq!(
            run(&mut ks, &["XADD", "s", "5-1", "f", "v"]),
            RespValue::error(
                "ERR The ID specified in XADD is equal or smaller than the target stream top item"
            )
        );
        assert_eq!(run(&mut ks, &["XADD", "s", "5-*", "f", "v"]), bulk("5-2"));
        assert_eq!(run(&mut ks, &["XADD", "s", "*", "f", "v"]), bulk("1000-0"));
        assert_eq!(run(&mut ks, &["TYPE", "s"]), RespValue::simple_string("stream"));

        assert_eq!(
            run(&mut ks, &["XADD", "t", "0-0", "f", "v"]),
            RespValue::error("ERR The ID specified in XADD must be greater than 0-0")
        );
        assert_eq!(
            run(&mut ks, &["XADD", "t", "a-b", "f", "v"]),
            RespValue::error("ERR Invalid stream ID specified as stream command argument")
        );
        assert_eq!(run(&mut ks, &["TYPE", "t"]), RespValue::simple_string("none"));
    }

    #[test]
    fn test_xrange() {
        let mut ks = Keyspace::new();
        run(&mut ks, &["XADD", "s", "1-1", "a", "1"]);
        run(&mut ks, &["XADD", "s", "2-1", "b", "2", "c", "3"]);
        run(&mut ks, &["XADD", "s", "3-1", "d", "4"]);

        let entry = |id: &str, fields: &[&str]| RespValue::array(vec![bulk(id), bulks(fields)]);

        assert_eq!(
            run(&mut ks, &["XRANGE", "s", "2", "+"]),
            RespValue::array(vec![entry("2-1", &["b", "2", "c", "3"]), entry("3-1", &["d", "4"])])
        );
        assert_eq!(
            run(&mut ks, &["XRANGE", "s", "-", "2"]),
            RespValue::array(vec![entry("1-1", &["a", "1"]), entry("2-1", &["b", "2", "c", "3"])])
        );
        assert_eq!(
            run(&mut ks, &["XRANGE", "s", "-", "+", "COUNT", "1"]),
            RespValue::array(vec![entry("1-1", &["a", "1"])])
        );
        assert_eq!(run(&mut ks, &["XRANGE", "missing", "-", "+"]), RespValue::array(vec![]));
    }

    #[test]
    fn test_unknown_and_write_set() {
        let mut ks = Keyspace::new();
        assert_eq!(
            run(&mut ks, &["frobnicate"]),
            RespValue::error("ERR unknown command 'frobnicate'")
        );
        assert!(is_write("XADD"));
        assert!(is_write("LPOP"));
        assert!(!is_write("GET"));
        assert!(!is_write("GEOSEARCH"));
    }
}
