//! Console output and script file execution, the only places the
//! standard library touches the outside world.

use crate::run::run_file;
use cubescript_core::state::CsState;
use cubescript_core::value::Value;
use cubescript_core::CsResult;

pub fn init(cs: &mut CsState) -> CsResult<()> {
    cs.new_command("echo", "C", |_, args, _| {
        println!("{}", args[0].get_str());
        Ok(())
    })?;

    cs.new_command("exec", "sb", |cs, args, res| {
        let file = args[0].get_str();
        let ok = run_file(cs, &*file)?;
        if !ok && args[1].get_int() != 0 {
            cs.diagnostic(format!("could not run file \"{file}\""));
        }
        *res = Value::from(ok);
        Ok(())
    })?;

    Ok(())
}
