use super::{PostHandler, PostHandlerError};
use crate::context::Context;

/// Replaces every alias key by its display name, in insertion order.
pub struct SwapAlias;

impl PostHandler for SwapAlias {
    fn name(&self) -> &'static str {
        "SwapAlias"
    }

    fn priority(&self) -> i32 {
        10
    }

    fn handle(&self, data: &str, ctx: &Context) -> Result<String, PostHandlerError> {
        let mut out = data.to_string();
        for (key, value) in ctx.aliases() {
            let Some(value) = value else { continue };
            if key.is_empty() || key == value {
                continue;
            }
            if out.contains(key.as_str()) {
                out = out.replace(key.as_str(), value);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_apply_in_order() {
        let mut ctx = Context::for_tests();
        ctx.set_alias("speed_car", Some("speed_汽车"));
        ctx.set_alias("f_c", Some("f_c"));
        let out = SwapAlias.handle("<mi>speed_car</mi><mi>f_c</mi>", &ctx).unwrap();
        assert_eq!(out, "<mi>speed_汽车</mi><mi>f_c</mi>");
    }

    #[test]
    fn removed_alias_no_longer_applies() {
        let mut ctx = Context::for_tests();
        ctx.set_alias("speed_car", Some("speed_汽车"));
        ctx.set_alias("speed_car", None);
        let out = SwapAlias.handle("<mi>speed_car</mi>", &ctx).unwrap();
        assert_eq!(out, "<mi>speed_car</mi>");
    }
}
