//! Driver script templates handed to the simulator.

/// Sets the directory the graph dump is written into.
const DRIVER_HEADER: &str = "\nstrdef verify_dir_ \nverify_dir_ = \"{model_dir}\"\n";

/// Defines `verify_graph_()`, which writes every open Graph to `<verify_dir_>/gout`.
const DRIVER_BODY: &str = r#"
if (name_declared("verify_dir_") == 0) {
	execute("~strdef verify_dir_")
	execute("verify_dir_ = \".\"")
}
strdef verify_tstr_
objref verify_glist_, verify_xvec_, verify_yvec_, verify_file_
verify_file_ = new File()
sprint(verify_tstr_, "%s/gout", verify_dir_)
verify_file_.wopen(verify_tstr_)
verify_xvec_ = new Vector()
verify_yvec_ = new Vector()
verify_glist_ = new List("Graph")

proc verify_graph_() {local i, j, k
	verify_file_.printf("Graphs %d\n", verify_glist_.count)
	for i=0, verify_glist_.count-1 {
		verify_file_.printf("%s\n", verify_glist_.object(i))
		k = 0
		for (j=-1; (j=verify_glist_.object(i).line_info(j, verify_xvec_)) != -1; ){
			k += 1
		}
		verify_file_.printf("lines %d\n", k)
		for (j=-1; (j=verify_glist_.object(i).getline(j, verify_xvec_, verify_yvec_)) != -1; ){
			verify_file_.printf("points %d\n", verify_xvec_.size)
			verify_file_.printf("xvec%d\n", j)
			verify_xvec_.printf(verify_file_)
			verify_file_.printf("yvec%d\n", j)
			verify_yvec_.printf(verify_file_)
		}
	}
}
"#;

/// Terminates the simulator right away.
pub const QUIT_HOC: &str = "\nquit()\n";

pub const DRIVER_FILE: &str = "driver.hoc";
pub const QUIT_FILE: &str = "quit.hoc";
pub const PYTHON_RUN_FILE: &str = "model_run.py";
pub const SCRIPT_FILE: &str = "script.tmp";
pub const MOSINIT_FILE: &str = "mosinit.hoc";

/// Graph-capturing driver followed by the model's run commands.
pub fn driver_hoc(model_dir: &str, commands: &[String]) -> String {
    let mut out = DRIVER_HEADER.replace("{model_dir}", model_dir);
    out.push_str(DRIVER_BODY);
    out.push_str(&commands.join("\n"));
    out
}

/// Plain python script with the run commands.
pub fn python_runfile(commands: &[String]) -> String {
    commands.join("\n")
}
