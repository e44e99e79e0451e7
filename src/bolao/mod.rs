pub mod dezena;
pub mod matcher;
pub mod tokens;
