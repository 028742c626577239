/// Lua script for the windowed counter increment
///
/// Increments the counter and starts its expiry in the same atomic step, so
/// two concurrent requests can never both observe a stale count or leave the
/// key without a TTL.
///
/// KEYS[1] = the counter key
/// ARGV[1] = window duration (seconds)
///
/// Returns: the post-increment count
pub const INCREMENT_SCRIPT: &str = r#"
local key = KEYS[1]
local window = tonumber(ARGV[1])

local current = redis.call('INCR', key)

-- Start the window on the first request, or repair a key left without expiry
if current == 1 or redis.call('TTL', key) == -1 then
    redis.call('EXPIRE', key, window)
end

return current
"#;
