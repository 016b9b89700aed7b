// Copyright (C) 2025 Ryan Daum <ryan.daum@gmail.com> This program is free
// software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, version
// 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;
    use rebind_compiler::{
        CodegenOptions, CollectingSink, Diagnostic, LiftError, LiftOptions, NullSink, Pipeline,
        PipelineError, PipelineOptions, lift, unparse, wrap_for_loading,
    };
    use rebind_iseq::{FormatVersion, Instruction, InstructionSequence, IseqType};
    use serde_json::json;
    use std::path::PathBuf;
    use unindent::unindent;

    fn fixture(name: &str) -> serde_json::Value {
        let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("tests/fixtures")
            .join(name);
        let text = std::fs::read_to_string(path).expect("Could not read fixture");
        serde_json::from_str(&text).expect("Fixture is not JSON")
    }

    fn load(name: &str) -> InstructionSequence {
        InstructionSequence::from_json(&fixture(name)).expect("Could not decode fixture")
    }

    #[test]
    fn do_block_binds_become_continuations() {
        let iseq = load("do_block.json");
        let mut pipeline =
            Pipeline::new(PipelineOptions::default()).with_sink(CollectingSink::default());

        let tree = pipeline.tree(&iseq).unwrap();
        let expected = unindent(
            r#"
            [1, 2].and_then do |a|
              b = a + 1
              [b, b * 2].within do |c|
                c + a
              end
            end"#,
        );
        assert_eq!(unparse(&tree), expected);

        let lowered = pipeline.run(&iseq).unwrap();
        assert_eq!(lowered.kind, IseqType::Block);
        assert_eq!(lowered.version, iseq.version);
        assert_eq!(lowered.locals, iseq.locals);
        let ops: Vec<_> = lowered.instructions().collect();
        assert!(
            matches!(
                ops.as_slice(),
                [
                    Instruction::DupArray(_),
                    Instruction::Send { call, block: Some(_) },
                    Instruction::Leave,
                ] if call.mid == "and_then"
            ),
            "unexpected body:\n{lowered}"
        );

        // Lifting the output again gives back the rewritten program.
        let relifted = lift(&lowered, &LiftOptions::default(), &mut NullSink).unwrap();
        assert_eq!(unparse(&relifted), expected);

        let diagnostics = &pipeline.sink().diagnostics;
        let rewrites = diagnostics
            .iter()
            .filter(|d| matches!(d, Diagnostic::MarkerRewritten { .. }))
            .count();
        // Once for `tree`, once for `run`.
        assert_eq!(rewrites, 4);
        assert!(diagnostics.contains(&Diagnostic::CatchEntryIgnored {
            kind: "next".to_string()
        }));
    }

    #[test]
    fn conditional_round_trips() {
        let iseq = load("conditional.json");
        let mut pipeline = Pipeline::new(PipelineOptions::default()).with_sink(NullSink);
        let tree = pipeline.tree(&iseq).unwrap();
        let expected = unindent(
            r#"
            x = if ready
              foo(1)
            else
              bar
            end
            puts(x)"#,
        );
        assert_eq!(unparse(&tree), expected);

        let lowered = pipeline.lower(&tree).unwrap();
        assert_eq!(lowered.misc.local_size, 2);
        let again = pipeline.lift(&lowered).unwrap();
        assert_eq!(again, tree);
    }

    #[test]
    fn only_run_carries_the_input_version() {
        let mut dump = fixture("conditional.json");
        dump[2] = json!(0);
        let iseq = InstructionSequence::from_json(&dump).unwrap();
        let older = FormatVersion {
            major: 2,
            minor: 0,
            format_type: 1,
        };
        assert_eq!(iseq.version, older);

        let mut pipeline = Pipeline::new(PipelineOptions::default()).with_sink(NullSink);
        assert_eq!(pipeline.run(&iseq).unwrap().version, older);
        let tree = pipeline.tree(&iseq).unwrap();
        assert_eq!(pipeline.lower(&tree).unwrap().version, FormatVersion::default());

        let options = PipelineOptions {
            codegen: CodegenOptions {
                version: Some(older),
                ..Default::default()
            },
            ..Default::default()
        };
        let mut pinned = Pipeline::new(options).with_sink(NullSink);
        assert_eq!(pinned.lower(&tree).unwrap().version, older);
    }

    #[test]
    fn rewriting_can_be_disabled() {
        let options = PipelineOptions {
            rewrite_enabled: false,
            ..Default::default()
        };
        let mut pipeline = Pipeline::new(options).with_sink(NullSink);
        let lowered = pipeline.run(&load("do_block.json")).unwrap();
        let binds = lowered
            .instructions()
            .filter(|i| matches!(i, Instruction::Send { call, .. } if call.mid == "<="))
            .count();
        assert_eq!(binds, 2);
        assert!(
            lowered
                .instructions()
                .all(|i| !matches!(i, Instruction::Send { block: Some(_), .. }))
        );
    }

    #[test]
    fn run_json_emits_the_array_form() {
        let mut pipeline = Pipeline::new(PipelineOptions::default()).with_sink(NullSink);
        let out = pipeline.run_json(&fixture("conditional.json")).unwrap();
        assert_eq!(out[0], "YARVInstructionSequence/SimpleDataFormat");
        let decoded = InstructionSequence::from_json(&out).unwrap();
        assert_eq!(decoded.kind, IseqType::Top);
        assert_eq!(decoded.locals, load("conditional.json").locals);
    }

    #[test]
    fn stage_failures_are_reported_by_stage() {
        let mut pipeline = Pipeline::new(PipelineOptions::default()).with_sink(NullSink);
        assert!(matches!(
            pipeline.run_json(&json!(["not an instruction sequence"])),
            Err(PipelineError::Decode(_))
        ));

        let mut dump = fixture("conditional.json");
        dump[13] = json!([["getinstancevariable", "@a", 0], ["leave"]]);
        assert!(matches!(
            pipeline.run_json(&dump),
            Err(PipelineError::Lift(LiftError::UnsupportedOpcode { .. }))
        ));

        let mut dump = fixture("do_block.json");
        let body = dump[13].as_array_mut().unwrap();
        // Return straight after the second bind, so it has nothing to continue with.
        let keep = body.len() - 11;
        body.truncate(keep);
        body.push(json!(["leave"]));
        assert!(matches!(
            pipeline.run_json(&dump),
            Err(PipelineError::Rewrite(_))
        ));
    }

    #[test]
    fn blocks_are_wrapped_for_loading() {
        let mut pipeline = Pipeline::new(PipelineOptions::default()).with_sink(NullSink);
        let lowered = pipeline.run(&load("do_block.json")).unwrap();
        let wrapped = wrap_for_loading(lowered.clone(), &CodegenOptions::default());
        assert_eq!(wrapped.kind, IseqType::Top);
        let ops: Vec<_> = wrapped.instructions().collect();
        match ops.as_slice() {
            [
                Instruction::PutSelf,
                Instruction::Send {
                    call,
                    block: Some(block),
                },
                Instruction::Leave,
            ] => {
                assert_eq!(call.mid, "proc");
                assert_eq!(**block, lowered);
            }
            other => panic!("unexpected wrapper body: {other:?}"),
        }

        // Top-level code is loadable as is.
        let top = pipeline.run(&load("conditional.json")).unwrap();
        assert_eq!(wrap_for_loading(top.clone(), &CodegenOptions::default()), top);
    }
}
