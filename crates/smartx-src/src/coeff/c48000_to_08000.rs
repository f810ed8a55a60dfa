//! Polyphase prototypes for 48 kHz -> 8 kHz conversion.
//! N=4 prototypes of length M=128 (alpha=5.6, gamma=0.4155).

pub(crate) static COEFF_48000_TO_08000: [f32; 512] = [
    4.408524920e-05, 1.032695301e-04, 1.632407206e-04, 2.046099499e-04,
    2.064838300e-04, 1.523197754e-04, 3.614709784e-05, -1.325292939e-04,
    -3.268396195e-04, -5.049236926e-04, -6.169413205e-04, -6.159362866e-04,
    -4.705913942e-04, -1.770087710e-04, 2.336932034e-04, 6.947683119e-04,
    1.111830507e-03, 1.379245866e-03, 1.402640340e-03, 1.123324405e-03,
    5.392014398e-04, -2.834219254e-04, -1.211555375e-03, -2.062821546e-03,
    -2.637121958e-03, -2.757962066e-03, -2.315746806e-03, -1.303665251e-03,
    1.630487448e-04, 1.851431359e-03, 3.441483407e-03, 4.580675057e-03,
    4.954108627e-03, 4.357593692e-03, 2.758416718e-03, 3.290499958e-04,
    -2.557279446e-03, -5.373728703e-03, -7.525932258e-03, -8.464693104e-03,
    -7.805789205e-03, -5.433409361e-03, -1.564028459e-03, 3.247455251e-03,
    8.168269403e-03, 1.221190945e-02, 1.441002467e-02, 1.400517061e-02,
    1.063056196e-02, 4.441734933e-03, -3.829689760e-03, -1.291861647e-02,
    -2.116818804e-02, -2.675578938e-02, -2.797229898e-02, -2.351170503e-02,
    -1.272318665e-02, 4.219121338e-03, 2.626232738e-02, 5.155303109e-02,
    7.764253765e-02, 1.017927661e-01, 1.213390723e-01, 1.340555419e-01,
    1.384665018e-01, 1.340555419e-01, 1.213390723e-01, 1.017927661e-01,
    7.764253765e-02, 5.155303109e-02, 2.626232738e-02, 4.219121338e-03,
    -1.272318665e-02, -2.351170503e-02, -2.797229898e-02, -2.675578938e-02,
    -2.116818804e-02, -1.291861647e-02, -3.829689760e-03, 4.441734933e-03,
    1.063056196e-02, 1.400517061e-02, 1.441002467e-02, 1.221190945e-02,
    8.168269403e-03, 3.247455251e-03, -1.564028459e-03, -5.433409361e-03,
    -7.805789205e-03, -8.464693104e-03, -7.525932258e-03, -5.373728703e-03,
    -2.557279446e-03, 3.290499958e-04, 2.758416718e-03, 4.357593692e-03,
    4.954108627e-03, 4.580675057e-03, 3.441483407e-03, 1.851431359e-03,
    1.630487448e-04, -1.303665251e-03, -2.315746806e-03, -2.757962066e-03,
    -2.637121958e-03, -2.062821546e-03, -1.211555375e-03, -2.834219254e-04,
    5.392014398e-04, 1.123324405e-03, 1.402640340e-03, 1.379245866e-03,
    1.111830507e-03, 6.947683119e-04, 2.336932034e-04, -1.770087710e-04,
    -4.705913942e-04, -6.159362866e-04, -6.169413205e-04, -5.049236926e-04,
    -3.268396195e-04, -1.325292939e-04, 3.614709784e-05, 1.523197754e-04,
    2.064838300e-04, 2.046099499e-04, 1.632407206e-04, 1.032695301e-04,
    5.354772712e-05, 6.238891967e-05, 5.419755676e-05, 2.500638458e-05,
    -2.396090862e-05, -8.518725351e-05, -1.452958082e-04, -1.872469037e-04,
    -1.940870238e-04, -1.535729513e-04, -6.262120386e-05, 6.963256142e-05,
    2.212576367e-04, 3.601017338e-04, 4.495035136e-04, 4.563385084e-04,
    3.598584846e-04, 1.593043439e-04, -1.217926355e-04, -4.362740483e-04,
    -7.197306698e-04, -9.021079829e-04, -9.227402455e-04, -7.459104104e-04,
    -3.734373601e-04, 1.490840577e-04, 7.348450264e-04, 1.268024060e-03,
    1.624420481e-03, 1.697245842e-03, 1.423171022e-03, 8.029598329e-04,
    -8.860288091e-05, -1.107195169e-03, -2.058960390e-03, -2.733958316e-03,
    -2.947856833e-03, -2.584231529e-03, -1.628727695e-03, -1.869224710e-04,
    1.519928595e-03, 3.183261810e-03, 4.457041445e-03, 5.021785698e-03,
    4.651850178e-03, 3.273179555e-03, 9.992211278e-04, -1.864365541e-03,
    -4.850534208e-03, -7.395221985e-03, -8.926784888e-03, -8.966600871e-03,
    -7.223705343e-03, -3.666034683e-03, 1.446241221e-03, 7.574061893e-03,
    1.396056062e-02, 1.973262960e-02, 2.402824611e-02, 2.612964608e-02,
    2.558053484e-02, 2.226738647e-02, 1.645028731e-02, 8.736857485e-03,
    2.162779701e-06, -8.733429536e-03, -1.644939011e-02, -2.227019603e-02,
    -2.558755694e-02, -2.614062287e-02, -2.404219809e-02, -1.974802417e-02,
    -1.397557541e-02, -7.586894705e-03, -1.455410891e-03, 3.661449284e-03,
    7.223928397e-03, 8.971145540e-03, 8.934560147e-03, 7.404736837e-03,
    4.860159353e-03, 1.872604051e-03, -9.935017993e-04, -3.270592499e-03,
    -4.652433206e-03, -5.025047932e-03, -4.462096857e-03, -3.189019598e-03,
    -1.525302131e-03, 1.828269125e-04, 1.626474527e-03, 2.583991693e-03,
    2.949420869e-03, 2.736816931e-03, 2.062431148e-03, 1.110567281e-03,
    9.127131653e-05, -8.013948642e-04, -1.422854259e-03, -1.698070866e-03,
    -1.626080661e-03, -1.270095521e-03, -7.368820603e-04, -1.507070792e-04,
    3.724775138e-04, 7.457015723e-04, 9.232134257e-04, 9.030720457e-04,
    7.209265394e-04, 4.374351643e-04, 1.226987377e-04, -1.587900704e-04,
    -3.597742315e-04, -4.566307816e-04, -4.500517585e-04, -3.607531316e-04,
    -2.218634312e-04, -7.007811314e-05, 6.239805598e-05, 1.535774079e-04,
    1.942756377e-04, 1.875449961e-04, 1.456188441e-04, 8.546090640e-05,
    2.413559553e-05, -2.494887125e-05, -5.424557143e-05, -6.250900966e-05,
    7.948378926e-06, 8.901605165e-07, -9.236296686e-06, -2.025553356e-05,
    -2.910944017e-05, -3.252468144e-05, -2.789256279e-05, -1.416153161e-05,
    7.499236033e-06, 3.349107478e-05, 5.817939642e-05, 7.490612295e-05,
    7.747946464e-05, 6.185069730e-05, 2.758751670e-05, -2.126466349e-05,
    -7.626096177e-05, -1.257265284e-04, -1.569273700e-04, -1.588942594e-04,
    -1.253367103e-04, -5.697095825e-05, 3.738355194e-05, 1.413970993e-04,
    2.336473143e-04, 2.915956044e-04, 2.964590921e-04, 2.380132061e-04,
    1.182360136e-04, -4.718979915e-05, -2.301619558e-04, -3.943476410e-04,
    -5.017717606e-04, -5.207094361e-04, -4.333624574e-04, -2.416508243e-04,
    3.035758814e-05, 3.383269210e-04, 6.239997631e-04, 8.252545082e-04,
    8.882627441e-04, 7.795222298e-04, 4.953203064e-04, 6.643785570e-05,
    -4.433727180e-04, -9.455152473e-04, -1.340400382e-03, -1.534935510e-03,
    -1.460675835e-03, -1.089269965e-03, -4.420648088e-04, 4.084154390e-04,
    1.346055938e-03, 2.227129667e-03, 2.902404710e-03, 3.241855959e-03,
    3.157778536e-03, 2.622160834e-03, 1.674996039e-03, 4.216705854e-04,
    -9.805803111e-04, -2.345244400e-03, -3.484595578e-03, -4.238672524e-03,
    -4.500347741e-03, -4.232262193e-03, -3.472751965e-03, -2.329758495e-03,
    -9.637597297e-04, 4.373807127e-04, 1.687407653e-03, 2.629685007e-03,
    3.159657556e-03, 3.238248774e-03, 2.894315906e-03, 2.216200121e-03,
    1.334257035e-03, 3.977041573e-04, -4.500681971e-04, -1.093526794e-03,
    -1.460858302e-03, -1.531424797e-03, -1.334162508e-03, -9.378849614e-04,
    -4.357903476e-04, 7.268618098e-05, 4.993128175e-04, 7.808282594e-04,
    8.869700935e-04, 8.219010194e-04, 6.194300810e-04, 3.335075514e-04,
    2.618827156e-05, -2.444940843e-04, -4.345265432e-04, -5.201926392e-04,
    -4.998835083e-04, -3.916142017e-04, -2.272017840e-04, -4.458562859e-05,
    1.200433943e-04, 2.387914027e-04, 2.962023982e-04, 2.904971250e-04,
    2.320357973e-04, 1.396551213e-04, 3.586551551e-05, -5.800466560e-05,
    -1.257582317e-04, -1.587151587e-04, -1.562765533e-04, -1.248074524e-04,
    -7.529961335e-05, -2.046024871e-05, 2.809932742e-05, 6.201603033e-05,
    7.732474688e-05, 7.451992058e-05, 5.768382052e-05, 3.301037986e-05,
    7.132797514e-06, -1.435662507e-05, -2.790690911e-05, -3.239055760e-05,
    -2.888644655e-05, -2.001238882e-05, -9.033508764e-06, 1.012903613e-06,
    -2.311825104e-06, -3.307889760e-06, -3.592030710e-06, -2.876970996e-06,
    -1.093705811e-06, 1.539257444e-06, 4.511979238e-06, 7.098109707e-06,
    8.503714609e-06, 8.064248577e-06, 5.446841386e-06, 8.062079746e-07,
    -5.154478104e-06, -1.125045663e-05, -1.601592180e-05, -1.801164995e-05,
    -1.618216355e-05, -1.018334165e-05, -5.959295615e-07, 1.104534255e-05,
    2.244401490e-05, 3.094549125e-05, 3.409052311e-05, 3.021289933e-05,
    1.894993691e-05, 1.535597932e-06, -1.922256314e-05, -3.932327062e-05,
    -5.427388074e-05, -6.000399494e-05, -5.381741532e-05, -3.517862244e-05,
    -6.140292867e-06, 2.872763098e-05, 6.295612439e-05, 8.927969861e-05,
    1.010499877e-04, 9.370105333e-05, 6.596708543e-05, 2.057186175e-05,
    -3.581149491e-05, -9.340313745e-05, -1.408780418e-04, -1.674094011e-04,
    -1.648374145e-04, -1.295490871e-04, -6.367480482e-05, 2.469240289e-05,
    1.223830137e-04, 2.130672561e-04, 2.799229887e-04, 3.086138652e-04,
    2.900480609e-04, 2.223954131e-04, 1.119480211e-04, -2.739946783e-05,
    -1.760311764e-04, -3.115843937e-04, -4.125384420e-04, -4.618101050e-04,
    -4.497260614e-04, -3.758358553e-04, -2.492222049e-04, -8.722507233e-05,
    8.722507233e-05, 2.492222049e-04, 3.758358553e-04, 4.497260614e-04,
    4.618101050e-04, 4.125384420e-04, 3.115843937e-04, 1.760311764e-04,
    2.739946783e-05, -1.119480211e-04, -2.223954131e-04, -2.900480609e-04,
    -3.086138652e-04, -2.799229887e-04, -2.130672561e-04, -1.223830137e-04,
    -2.469240289e-05, 6.367480482e-05, 1.295490871e-04, 1.648374145e-04,
    1.674094011e-04, 1.408780418e-04, 9.340313745e-05, 3.581149491e-05,
    -2.057186175e-05, -6.596708543e-05, -9.370105333e-05, -1.010499877e-04,
    -8.927969861e-05, -6.295612439e-05, -2.872763098e-05, 6.140292867e-06,
    3.517862244e-05, 5.381741532e-05, 6.000399494e-05, 5.427388074e-05,
    3.932327062e-05, 1.922256314e-05, -1.535597932e-06, -1.894993691e-05,
    -3.021289933e-05, -3.409052311e-05, -3.094549125e-05, -2.244401490e-05,
    -1.104534255e-05, 5.959295616e-07, 1.018334165e-05, 1.618216355e-05,
    1.801164995e-05, 1.601592180e-05, 1.125045663e-05, 5.154478104e-06,
    -8.062079746e-07, -5.446841386e-06, -8.064248577e-06, -8.503714609e-06,
    -7.098109707e-06, -4.511979238e-06, -1.539257444e-06, 1.093705811e-06,
    2.876970996e-06, 3.592030710e-06, 3.307889760e-06, 2.311825104e-06,
];
