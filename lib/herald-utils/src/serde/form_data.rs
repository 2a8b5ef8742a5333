//! Deserializer for `application/x-www-form-urlencoded` bodies and query strings.
//!
//! Only flat structs of strings (optionally wrapped in `Option`) and booleans are supported,
//! which is all the dashboard forms ever send.

use std::fmt::Display;

use serde::{de, Deserialize};

pub fn from_str<'a, T>(s: &'a str) -> Result<T, Error>
where
    T: Deserialize<'a>,
{
    let deserializer = Deserializer::new(s);
    let t = T::deserialize(deserializer)?;
    Ok(t)
}

macro_rules! de_unsupported {
    ($func_name:ident) => {
        fn $func_name<V>(self, _visitor: V) -> Result<V::Value, Self::Error>
        where
            V: serde::de::Visitor<'de>,
        {
            Err(Error::Unsupported(stringify!($func_name)))
        }
    };
    ($func_name:ident, $($arg:ident: $arg_type:ty),*) => {
        fn $func_name<V>(self, $($arg: $arg_type,)* _visitor: V) -> Result<V::Value, Self::Error>
        where
            V: serde::de::Visitor<'de>,
        {
            Err(Error::Unsupported(stringify!($func_name)))
        }
    };
}

#[derive(Debug, PartialEq)]
pub enum Error {
    CustomMessage(String),
    Unsupported(&'static str),
    CantParseKey(String),
    CantParseBool(String),
}

impl serde::de::Error for Error {
    fn custom<T: Display>(msg: T) -> Self {
        Error::CustomMessage(msg.to_string())
    }
}

impl Display for Error {
    fn fmt(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::CustomMessage(msg) => formatter.write_str(msg),
            Error::Unsupported(s) => write!(formatter, "unsupported operation: {s}"),
            Error::CantParseKey(s) => write!(formatter, "can't parse key from: {s}"),
            Error::CantParseBool(s) => write!(formatter, "can't parse boolean from: {s}"),
        }
    }
}

impl std::error::Error for Error {}

struct Deserializer<'de> {
    input: &'de str,
}

impl<'de> Deserializer<'de> {
    fn new(input: &'de str) -> Self {
        Deserializer { input }
    }
}

impl<'de> de::Deserializer<'de> for Deserializer<'de> {
    type Error = Error;

    fn deserialize_map<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: de::Visitor<'de>,
    {
        visitor.visit_map(KeyValuePairs::new(self.input))
    }

    fn deserialize_struct<V>(
        self,
        _name: &'static str,
        _fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, Self::Error>
    where
        V: de::Visitor<'de>,
    {
        self.deserialize_map(visitor)
    }

    de_unsupported!(deserialize_any);
    de_unsupported!(deserialize_bool);
    de_unsupported!(deserialize_i8);
    de_unsupported!(deserialize_i16);
    de_unsupported!(deserialize_i32);
    de_unsupported!(deserialize_i64);
    de_unsupported!(deserialize_u8);
    de_unsupported!(deserialize_u16);
    de_unsupported!(deserialize_u32);
    de_unsupported!(deserialize_u64);
    de_unsupported!(deserialize_f32);
    de_unsupported!(deserialize_f64);
    de_unsupported!(deserialize_char);
    de_unsupported!(deserialize_bytes);
    de_unsupported!(deserialize_byte_buf);
    de_unsupported!(deserialize_option);
    de_unsupported!(deserialize_unit);
    de_unsupported!(deserialize_seq);
    de_unsupported!(deserialize_str);
    de_unsupported!(deserialize_string);
    de_unsupported!(deserialize_identifier);
    de_unsupported!(deserialize_ignored_any);
    de_unsupported!(deserialize_tuple, _len: usize);
    de_unsupported!(deserialize_unit_struct, _name: &'static str);
    de_unsupported!(deserialize_newtype_struct, _name: &'static str);
    de_unsupported!(deserialize_tuple_struct, _name: &'static str, _len: usize);
    de_unsupported!(deserialize_enum, _name: &'static str, _variants: &'static [&'static str]);
}

struct KeyValuePairs<'de> {
    rest: &'de str,
}

impl<'de> KeyValuePairs<'de> {
    fn new(rest: &'de str) -> Self {
        KeyValuePairs { rest }
    }
}

impl<'de> de::MapAccess<'de> for KeyValuePairs<'de> {
    type Error = Error;

    fn next_key_seed<K>(&mut self, seed: K) -> Result<Option<K::Value>, Self::Error>
    where
        K: de::DeserializeSeed<'de>,
    {
        if self.rest.is_empty() {
            return Ok(None);
        };

        match self.rest.split_once('=') {
            Some((key, rest)) => {
                self.rest = rest;
                seed.deserialize(FieldValue(key)).map(Some)
            }
            None => Err(Error::CantParseKey(self.rest.into())),
        }
    }

    fn next_value_seed<V>(&mut self, seed: V) -> Result<V::Value, Self::Error>
    where
        V: de::DeserializeSeed<'de>,
    {
        // a trailing `key=` is an empty value, the way browsers submit blank inputs
        let value = match self.rest.split_once('&') {
            Some((value, rest)) => {
                self.rest = rest;
                value
            }
            None => std::mem::take(&mut self.rest),
        };
        seed.deserialize(FieldValue(value))
    }
}

struct FieldValue<'de>(&'de str);

impl<'de> de::Deserializer<'de> for FieldValue<'de> {
    type Error = Error;

    fn deserialize_string<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: de::Visitor<'de>,
    {
        visitor.visit_string(decode(self.0))
    }

    fn deserialize_str<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: de::Visitor<'de>,
    {
        visitor.visit_string(decode(self.0))
    }

    fn deserialize_identifier<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: de::Visitor<'de>,
    {
        visitor.visit_string(decode(self.0))
    }

    fn deserialize_bool<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: de::Visitor<'de>,
    {
        match decode(self.0).as_str() {
            "on" | "true" | "1" => visitor.visit_bool(true),
            "off" | "false" | "0" => visitor.visit_bool(false),
            other => Err(Error::CantParseBool(other.to_owned())),
        }
    }

    fn deserialize_ignored_any<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: de::Visitor<'de>,
    {
        visitor.visit_unit()
    }

    fn deserialize_option<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: de::Visitor<'de>,
    {
        if self.0.is_empty() {
            visitor.visit_none()
        } else {
            visitor.visit_some(self)
        }
    }

    de_unsupported!(deserialize_any);
    de_unsupported!(deserialize_i8);
    de_unsupported!(deserialize_i16);
    de_unsupported!(deserialize_i32);
    de_unsupported!(deserialize_i64);
    de_unsupported!(deserialize_u8);
    de_unsupported!(deserialize_u16);
    de_unsupported!(deserialize_u32);
    de_unsupported!(deserialize_u64);
    de_unsupported!(deserialize_f32);
    de_unsupported!(deserialize_f64);
    de_unsupported!(deserialize_char);
    de_unsupported!(deserialize_bytes);
    de_unsupported!(deserialize_byte_buf);
    de_unsupported!(deserialize_unit);
    de_unsupported!(deserialize_seq);
    de_unsupported!(deserialize_map);
    de_unsupported!(deserialize_tuple, _len: usize);
    de_unsupported!(deserialize_unit_struct, _name: &'static str);
    de_unsupported!(deserialize_newtype_struct, _name: &'static str);
    de_unsupported!(deserialize_tuple_struct, _name: &'static str, _len: usize);
    de_unsupported!(deserialize_enum, _name: &'static str, _variants: &'static [&'static str]);
    de_unsupported!(deserialize_struct, _name: &'static str, _fields: &'static [&'static str]);
}

fn decode(text: &str) -> String {
    let mut res = String::new();
    url_escape::decode_to_string(text.replace('+', " "), &mut res);
    res
}
