//! Identity-provider adapter: HS256 bearer tokens in, verified subject out.
//! Credentials are never checked anywhere else.

pub mod jwt;
pub mod middleware;
