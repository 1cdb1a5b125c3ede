//! 字段提取
//!
//! 按合作方配置的候选参数名，从 query 与 body 参数中提取 click id、金额、
//! 映射金额和其余参数。纯函数，不做任何 IO。

use std::collections::BTreeMap;

use crate::storage::models::{ParamValue, Partner, SumMappingRule};

/// 合作方 id 参数名
pub const PARTNER_ID_KEY: &str = "pid";

/// 入站请求参数：query 与 body 分开保存，查找时 query 优先
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestParams {
    query: BTreeMap<String, ParamValue>,
    body: BTreeMap<String, ParamValue>,
}

impl RequestParams {
    pub fn new(query: BTreeMap<String, ParamValue>, body: BTreeMap<String, ParamValue>) -> Self {
        Self { query, body }
    }

    pub fn from_query_str(query: &str) -> Self {
        Self {
            query: parse_urlencoded(query),
            body: BTreeMap::new(),
        }
    }

    /// `application/x-www-form-urlencoded` body
    pub fn with_form_body(mut self, body: &str) -> Self {
        self.body = parse_urlencoded(body);
        self
    }

    /// JSON object body，非对象时忽略
    pub fn with_json_body(mut self, body: &[u8]) -> Self {
        if let Ok(serde_json::Value::Object(map)) = serde_json::from_slice(body) {
            self.body = map
                .into_iter()
                .filter_map(|(k, v)| json_to_param(v).map(|p| (k, p)))
                .collect();
        }
        self
    }

    pub fn query(&self) -> &BTreeMap<String, ParamValue> {
        &self.query
    }

    pub fn body(&self) -> &BTreeMap<String, ParamValue> {
        &self.body
    }

    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.query.get(key).or_else(|| self.body.get(key))
    }

    /// 非空的合作方 id（query 优先），原样返回不做 trim
    pub fn partner_id(&self) -> Option<String> {
        self.get(PARTNER_ID_KEY)
            .and_then(ParamValue::first)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }

    /// 合并后的全部参数，同名时 body 覆盖 query
    pub fn merged(&self) -> BTreeMap<String, ParamValue> {
        let mut all = self.query.clone();
        all.extend(self.body.iter().map(|(k, v)| (k.clone(), v.clone())));
        all
    }
}

fn json_to_param(value: serde_json::Value) -> Option<ParamValue> {
    use serde_json::Value;

    fn scalar(value: Value) -> Option<String> {
        match value {
            Value::Null => None,
            Value::String(s) => Some(s),
            Value::Bool(b) => Some(if b { "1".to_string() } else { String::new() }),
            other => Some(other.to_string()),
        }
    }

    match value {
        Value::Array(items) => Some(ParamValue::Multi(
            items.into_iter().filter_map(scalar).collect(),
        )),
        other => scalar(other).map(ParamValue::Single),
    }
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    match urlencoding::decode(&spaced) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => String::from_utf8_lossy(&urlencoding::decode_binary(spaced.as_bytes()))
            .into_owned(),
    }
}

/// 解析 urlencoded 字符串
///
/// `key[]=a&key[]=b` 收集为数组；普通键重复时后者覆盖前者。
pub fn parse_urlencoded(input: &str) -> BTreeMap<String, ParamValue> {
    let mut params: BTreeMap<String, ParamValue> = BTreeMap::new();

    for pair in input.split('&').filter(|p| !p.is_empty()) {
        let (raw_key, raw_value) = pair.split_once('=').unwrap_or((pair, ""));
        let key = decode_component(raw_key);
        let value = decode_component(raw_value);

        if let Some(base) = key.strip_suffix("[]") {
            if base.is_empty() {
                continue;
            }
            match params.get_mut(base) {
                Some(ParamValue::Multi(values)) => values.push(value),
                _ => {
                    params.insert(base.to_string(), ParamValue::Multi(vec![value]));
                }
            }
        } else if !key.is_empty() {
            params.insert(key, ParamValue::Single(value));
        }
    }

    params
}

/// 解析有限的十进制数，失败返回 None
pub fn parse_decimal(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// 按规则顺序查找第一个 from 与金额相等的映射，无匹配为 0
pub fn map_sum(sum: Option<f64>, rules: &[SumMappingRule]) -> f64 {
    let Some(sum) = sum else {
        return 0.0;
    };

    rules
        .iter()
        .find_map(|rule| {
            let from = parse_decimal(&rule.from)?;
            let to = parse_decimal(&rule.to)?;
            (from == sum).then_some(to)
        })
        .unwrap_or(0.0)
}

/// 提取结果
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedFields {
    pub click_id: Option<String>,
    pub sum: Option<f64>,
    pub mapped_sum: f64,
    pub extra_params: BTreeMap<String, ParamValue>,
}

pub fn extract_fields(partner: &Partner, params: &RequestParams) -> ExtractedFields {
    let click_id = partner.clickid_keys.iter().find_map(|key| {
        params
            .get(key)
            .and_then(ParamValue::first)
            .map(|v| v.trim().to_string())
    });

    // 第一个出现的金额键决定结果，无法解析即视为缺失
    let sum = partner
        .sum_keys
        .iter()
        .find_map(|key| params.get(key))
        .and_then(ParamValue::as_single)
        .and_then(parse_decimal);

    let mapped_sum = map_sum(sum, &partner.sum_mapping);

    let extra_params = params
        .merged()
        .into_iter()
        .filter(|(key, _)| {
            key != PARTNER_ID_KEY
                && !partner.clickid_keys.contains(key)
                && !partner.sum_keys.contains(key)
        })
        .collect();

    ExtractedFields {
        click_id,
        sum,
        mapped_sum,
        extra_params,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn partner(clickid_keys: &[&str], sum_keys: &[&str]) -> Partner {
        let mut p = Partner::new("acme", "Acme");
        p.clickid_keys = clickid_keys.iter().map(|k| k.to_string()).collect();
        p.sum_keys = sum_keys.iter().map(|k| k.to_string()).collect();
        p
    }

    #[test]
    fn test_first_listed_key_wins() {
        let p = partner(&["cid", "clickid"], &["sum"]);
        let params = RequestParams::from_query_str("clickid=abc&cid=xyz");
        assert_eq!(extract_fields(&p, &params).click_id.as_deref(), Some("xyz"));
    }

    #[test]
    fn test_query_checked_before_body() {
        let p = partner(&["clickid"], &["sum"]);
        let params =
            RequestParams::from_query_str("clickid=from-query").with_form_body("clickid=from-body");
        assert_eq!(
            extract_fields(&p, &params).click_id.as_deref(),
            Some("from-query")
        );
    }

    #[test]
    fn test_click_id_is_trimmed_and_absent_is_none() {
        let p = partner(&["clickid"], &["sum"]);
        let params = RequestParams::from_query_str("clickid=%20abc%20");
        assert_eq!(extract_fields(&p, &params).click_id.as_deref(), Some("abc"));

        let params = RequestParams::from_query_str("other=1");
        assert_eq!(extract_fields(&p, &params).click_id, None);
    }

    #[test]
    fn test_array_click_id_uses_first_element() {
        let p = partner(&["clickid"], &["sum"]);
        let params = RequestParams::from_query_str("clickid[]=a&clickid[]=b");
        assert_eq!(extract_fields(&p, &params).click_id.as_deref(), Some("a"));
    }

    #[test]
    fn test_sum_parsing() {
        let p = partner(&["clickid"], &["sum", "payout"]);

        let params = RequestParams::from_query_str("payout=12.5");
        assert_eq!(extract_fields(&p, &params).sum, Some(12.5));

        // 第一个出现的键无法解析时不再尝试后续键
        let params = RequestParams::from_query_str("sum=abc&payout=3");
        assert_eq!(extract_fields(&p, &params).sum, None);

        let params = RequestParams::from_query_str("sum=inf");
        assert_eq!(extract_fields(&p, &params).sum, None);

        let params = RequestParams::from_query_str("sum[]=1");
        assert_eq!(extract_fields(&p, &params).sum, None);
    }

    #[test]
    fn test_sum_mapping() {
        let rules = vec![SumMappingRule::new("1", "10"), SumMappingRule::new("2", "20")];
        assert_eq!(map_sum(Some(2.0), &rules), 20.0);
        assert_eq!(map_sum(Some(3.0), &rules), 0.0);
        assert_eq!(map_sum(None, &rules), 0.0);

        let rules = vec![
            SumMappingRule::new("x", "99"),
            SumMappingRule::new("2.0", "bad"),
            SumMappingRule::new("2", "21"),
        ];
        assert_eq!(map_sum(Some(2.0), &rules), 21.0);
    }

    #[test]
    fn test_extra_params_exclude_known_keys_and_body_wins() {
        let p = partner(&["clickid"], &["sum"]);
        let params = RequestParams::from_query_str("pid=acme&clickid=1&sum=2&geo=US&sub=q")
            .with_form_body("sub=b&tags[]=x&tags[]=y");
        let fields = extract_fields(&p, &params);

        assert_eq!(fields.extra_params.len(), 3);
        assert_eq!(
            fields.extra_params["geo"],
            ParamValue::Single("US".to_string())
        );
        assert_eq!(fields.extra_params["sub"], ParamValue::Single("b".to_string()));
        assert_eq!(
            fields.extra_params["tags"],
            ParamValue::Multi(vec!["x".to_string(), "y".to_string()])
        );
    }

    #[test]
    fn test_parse_urlencoded_decoding() {
        let params = parse_urlencoded("a=1+2&b=%E4%B8%AD&c&d=1&d=2&=skip");
        assert_eq!(params["a"], ParamValue::Single("1 2".to_string()));
        assert_eq!(params["b"], ParamValue::Single("中".to_string()));
        assert_eq!(params["c"], ParamValue::Single(String::new()));
        assert_eq!(params["d"], ParamValue::Single("2".to_string()));
        assert!(!params.contains_key(""));
    }

    #[test]
    fn test_json_body() {
        let params = RequestParams::default()
            .with_json_body(br#"{"pid":"acme","sum":5,"ok":true,"tags":["a",1],"skip":null}"#);
        assert_eq!(params.partner_id().as_deref(), Some("acme"));
        assert_eq!(params.body()["sum"], ParamValue::Single("5".to_string()));
        assert_eq!(params.body()["ok"], ParamValue::Single("1".to_string()));
        assert_eq!(
            params.body()["tags"],
            ParamValue::Multi(vec!["a".to_string(), "1".to_string()])
        );
        assert!(!params.body().contains_key("skip"));

        let ignored = RequestParams::default().with_json_body(b"[1,2,3]");
        assert!(ignored.body().is_empty());
    }

    #[test]
    fn test_partner_id_is_untrimmed_and_non_empty() {
        assert_eq!(RequestParams::from_query_str("pid=").partner_id(), None);
        assert_eq!(
            RequestParams::from_query_str("pid=%20acme")
                .partner_id()
                .as_deref(),
            Some(" acme")
        );
        assert_eq!(
            RequestParams::from_query_str("x=1")
                .with_form_body("pid=acme")
                .partner_id()
                .as_deref(),
            Some("acme")
        );
    }
}
